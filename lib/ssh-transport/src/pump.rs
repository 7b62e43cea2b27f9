//! The blocking Connection Driver (§4.6): pumps bytes between a
//! [`TcpStream`] and a [`ServerConnection`] until the session reaches a
//! terminal or `Authenticating` state. The async equivalent used by the
//! tokio-based server lives in `ssh-server-tokio`.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::server::ServerConnection;
use crate::SessionId;

/// `timeout` follows the `poll(2)`-style convention named in §4.6:
/// negative blocks indefinitely, zero never blocks, positive is a bound
/// in milliseconds.
#[derive(Debug, Clone, Copy)]
pub enum PumpTimeout {
    Block,
    Immediate,
    Millis(u64),
}

impl PumpTimeout {
    pub fn from_millis_arg(timeout: i64) -> Self {
        match timeout {
            i64::MIN..=-1 => PumpTimeout::Block,
            0 => PumpTimeout::Immediate,
            ms => PumpTimeout::Millis(ms as u64),
        }
    }

    fn as_read_timeout(self) -> Option<Duration> {
        match self {
            PumpTimeout::Block => None,
            PumpTimeout::Immediate => Some(Duration::from_millis(1)),
            PumpTimeout::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("connection closed before key exchange finished")]
    Closed,
    #[error("session entered an error state: {0}")]
    SessionFailed(String),
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Continue,
    SessionEnded,
}

/// One iteration of the driver loop: flush queued output, read whatever
/// is available within `timeout`, feed it to the session, flush again.
pub fn pump_packets(
    stream: &mut TcpStream,
    connection: &mut ServerConnection,
    timeout: PumpTimeout,
) -> Result<PumpOutcome, DriverError> {
    flush_outbound(stream, connection)?;

    stream.set_read_timeout(timeout.as_read_timeout())?;
    let mut buf = [0u8; 4096];
    match stream.read(&mut buf) {
        Ok(0) => return Ok(PumpOutcome::SessionEnded),
        Ok(n) => {
            // A protocol error here moves the session to `Error`; the
            // caller observes that via `is_alive()` on the next iteration.
            let _ = connection.recv_bytes(&buf[..n]);
        }
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
        Err(err) => return Err(err.into()),
    }

    flush_outbound(stream, connection)?;

    if !connection.is_alive() {
        return Ok(PumpOutcome::SessionEnded);
    }
    Ok(PumpOutcome::Continue)
}

fn flush_outbound(stream: &mut TcpStream, connection: &mut ServerConnection) -> std::io::Result<()> {
    while let Some(msg) = connection.next_msg_to_send() {
        stream.write_all(&msg.to_bytes())?;
    }
    Ok(())
}

/// Drives `connection` with `stream` until key exchange completes and the
/// session reaches `Authenticating`, per §4.6's loop condition `while
/// state not in {Error, Authenticating, Disconnected}`.
pub fn drive_to_authenticated(
    stream: &mut TcpStream,
    connection: &mut ServerConnection,
) -> Result<SessionId, DriverError> {
    loop {
        if let Some(session_id) = connection.is_authenticating() {
            return Ok(session_id);
        }
        if !connection.is_alive() {
            return Err(DriverError::SessionFailed(
                connection.last_error().unwrap_or("unknown error").to_string(),
            ));
        }
        match pump_packets(stream, connection, PumpTimeout::Block)? {
            PumpOutcome::Continue => continue,
            PumpOutcome::SessionEnded => return Err(DriverError::Closed),
        }
    }
}
