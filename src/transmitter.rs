use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::transceiver::Transceiver;

/// Number of fragments needed to carry `len` bytes in chunks of at most `fragment_size`.
pub fn fragment_count(len: usize, fragment_size: usize) -> usize {
    len.div_ceil(fragment_size)
}

/// Sends `header` as one datagram followed by `payload` split into fragments of at most `fragment_size` bytes.
///
/// Fire-and-forget: nothing is acknowledged or retransmitted. A non-zero `pacing` sleeps between
/// datagrams, which keeps bursts from overrunning receive buffers on lossy stacks at the cost of
/// throughput; reliable transports can pass `Duration::ZERO`.
///
/// Returns the number of fragment datagrams sent (not counting the header).
pub fn send_framed<T: Transceiver>(
    transceiver: &T,
    dest: SocketAddr,
    header: &[u8],
    payload: &[u8],
    fragment_size: usize,
    pacing: Duration,
) -> Result<usize> {
    if fragment_size == 0 {
        return Err(ChatError::ZeroFragmentSize);
    }
    transceiver.send(header, dest).map_err(Into::<ChatError>::into)?;
    let mut sent = 0;
    for chunk in payload.chunks(fragment_size) {
        pace(pacing);
        transceiver.send(chunk, dest).map_err(Into::<ChatError>::into)?;
        sent += 1;
    }
    pace(pacing);
    log::trace!("sent header and {sent} fragments to {dest}");
    Ok(sent)
}

fn pace(pacing: Duration) {
    if !pacing.is_zero() {
        thread::sleep(pacing);
    }
}
