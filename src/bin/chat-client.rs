use std::{
    fmt::Display,
    io::{self, BufRead, Write},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
};

use udp_chat::{ChatSocket, Client, ClientEvent, ClientSender, SERVER_CONNECT_ADDR};

const CLEAR_LINE: &str = "\r                                                                                \r";

/// Serializes console output so incoming lines never split the prompt.
struct Console {
    lock: Mutex<()>,
    stop: AtomicBool,
}

impl Console {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            stop: AtomicBool::new(false),
        }
    }
    fn prompt(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.draw_prompt();
    }
    fn print_line(&self, line: impl Display) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        print!("{CLEAR_LINE}");
        println!("{line}");
        self.draw_prompt();
    }
    fn draw_prompt(&self) {
        if !self.is_stopped() {
            print!("> ");
            io::stdout().flush().ok();
        }
    }
    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
    /// Marks the session as stopping, returns true for the first caller only.
    fn stop(&self) -> bool {
        !self.stop.swap(true, Ordering::SeqCst)
    }
}

fn leave(sender: &ClientSender<ChatSocket>) {
    if let Err(e) = sender.leave() {
        log::error!("client failed to send leave: {e}");
    }
}

fn spawn_interrupt_handler(sender: ClientSender<ChatSocket>, console: Arc<Console>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("interrupt handler unavailable: {e}");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_err() {
            return;
        }
        if console.stop() {
            println!("\nDisconnecting on user interrupt (Ctrl+C)...");
            leave(&sender);
        }
        process::exit(130);
    });
}

fn read_username() -> io::Result<String> {
    print!("Enter your username: ");
    io::stdout().flush()?;
    let mut username = String::new();
    io::stdin().lock().read_line(&mut username)?;
    Ok(username.trim_end_matches(['\r', '\n']).to_string())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut client = match Client::new(SERVER_CONNECT_ADDR) {
        Ok(client) => client,
        Err(e) => {
            log::error!("client failed to start: {e}");
            process::exit(1);
        }
    };
    println!("Bound to {}", client.addr());

    let username = match read_username() {
        Ok(username) if !username.trim().is_empty() => username,
        Ok(_) => {
            println!("Username cannot be empty. Exiting.");
            return;
        }
        Err(e) => {
            log::error!("failed to read username: {e}");
            process::exit(1);
        }
    };

    let sender = client.sender();
    if let Err(e) = sender.join(&username) {
        log::error!("client failed to join: {e}");
        process::exit(1);
    }

    let console = Arc::new(Console::new());
    spawn_interrupt_handler(sender.clone(), console.clone());

    let receiver = {
        let console = console.clone();
        thread::spawn(move || {
            while !console.is_stopped() {
                match client.recv() {
                    Ok(Some(ClientEvent::Message(msg))) => console.print_line(msg),
                    Ok(Some(ClientEvent::Notice(notice))) => console.print_line(notice),
                    Ok(None) => {}
                    Err(e) if e.is_connection_reset() => {
                        console.print_line("[error] connection to server reset")
                    }
                    Err(e) => {
                        if !console.is_stopped() {
                            console.print_line(format!("[error] receive failed: {e}"));
                        }
                        break;
                    }
                }
            }
        })
    };

    println!("Connected as {username}. Type a message or 'bye' to leave.");
    console.prompt();

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("failed to read input: {e}");
                break;
            }
        };
        if console.is_stopped() || line.trim().eq_ignore_ascii_case("bye") {
            break;
        }
        if let Err(e) = sender.send_text(&line) {
            console.print_line(format!("[error] failed to send message: {e}"));
            continue;
        }
        console.prompt();
    }

    // `bye` and end of input both leave the room
    if console.stop() {
        println!("Disconnecting...");
        leave(&sender);
    }
    receiver.join().ok();
    println!("Closed.");
}
