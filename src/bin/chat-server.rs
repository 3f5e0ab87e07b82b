use std::process;

use udp_chat::{Server, SERVER_BIND_ADDR};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut server = match Server::new(SERVER_BIND_ADDR) {
        Ok(server) => server,
        Err(e) => {
            log::error!("server failed to start: {e}");
            process::exit(1);
        }
    };
    log::info!("waiting for connections...");
    server.run();
}
