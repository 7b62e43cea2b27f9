//! [`ServerListener`] wraps a `tokio::net::TcpListener`; [`ServerConnection`]
//! drives one accepted connection's [`ssh_transport::server::ServerConnection`]
//! state machine and [`ssh_connection::MessageDispatcher`] from a single
//! `tokio::select!` loop, the per-connection cooperative task the corpus
//! uses in place of per-connection OS threads (§5).

use std::net::SocketAddr;

use ssh_connection::MessageCallback;
use ssh_crypto::OsRng;
use ssh_keys::{FileKeyLoader, KeyAlgorithm, KeyLoadError, KeyLoader, PlaintextPrivateKey, PrivateKey};
use ssh_transport::listener::HostKeyPath;
use ssh_transport::server::{HostKeySlots, ServerConfig, ServerConnection as CoreConnection};
use ssh_transport::SessionId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("no host keys configured, a listener needs at least one")]
    NoHostKeys,
    #[error("could not bind socket: {0}")]
    Io(#[source] std::io::Error),
    #[error("could not load host key: {0}")]
    KeyLoad(#[from] KeyLoadError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed before key exchange finished")]
    Closed,
    #[error("session entered an error state: {0}")]
    SessionFailed(String),
}

/// Host key material loaded once at bind time, cloned into a fresh
/// [`HostKeySlots`] for every accepted connection -- the async twin of
/// `ssh_transport::listener::Listener`'s private `LoadedHostKeys`.
pub struct ServerListener {
    tcp: TcpListener,
    rsa: Option<PrivateKey>,
    dsa: Option<PrivateKey>,
    server_identification: Vec<u8>,
}

impl ServerListener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        host_key_paths: &[HostKeyPath],
        server_identification: Vec<u8>,
    ) -> Result<Self, BindError> {
        if host_key_paths.is_empty() {
            return Err(BindError::NoHostKeys);
        }

        let tcp = TcpListener::bind(addr).await.map_err(BindError::Io)?;

        let loader = FileKeyLoader;
        let mut rsa = None;
        let mut dsa = None;
        for entry in host_key_paths {
            let loaded = loader.load_private_key(&entry.path, entry.algorithm)?;
            match entry.algorithm {
                KeyAlgorithm::Rsa => rsa = Some(loaded.private_key),
                KeyAlgorithm::Dsa => dsa = Some(loaded.private_key),
            }
        }

        Ok(Self {
            tcp,
            rsa,
            dsa,
            server_identification,
        })
    }

    fn fresh_slots(&self) -> HostKeySlots {
        HostKeySlots {
            rsa: self
                .rsa
                .clone()
                .map(|private_key| PlaintextPrivateKey { private_key }),
            dsa: self
                .dsa
                .clone()
                .map(|private_key| PlaintextPrivateKey { private_key }),
        }
    }

    /// Accepts one connection and wraps it in a fresh [`ServerConnection`],
    /// matching the blocking `Listener::accept`'s "each accepted connection
    /// gets its own session struct" contract (§4.1), `.await`-based here.
    pub async fn accept(&self) -> std::io::Result<ServerConnection> {
        let (stream, peer_addr) = self.tcp.accept().await?;
        let config = ServerConfig {
            server_identification: self.server_identification.clone(),
        };
        let core = CoreConnection::new(OsRng, config, self.fresh_slots());
        Ok(ServerConnection {
            stream,
            peer_addr,
            core,
            dispatcher: ssh_connection::MessageDispatcher::new(),
            buf: [0; 4096],
        })
    }
}

/// One accepted connection, driven entirely by repeated calls to
/// [`ServerConnection::progress`] from the embedder's own task loop.
pub struct ServerConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    core: CoreConnection,
    dispatcher: ssh_connection::MessageDispatcher,
    buf: [u8; 4096],
}

impl ServerConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_authenticating(&self) -> Option<SessionId> {
        self.core.is_authenticating()
    }

    /// Drives the session through key exchange: repeatedly calls
    /// [`Self::progress`] until the session reaches `Authenticating` or a
    /// terminal state, the async equivalent of
    /// `ssh_transport::pump::drive_to_authenticated`.
    pub async fn drive_to_authenticated(&mut self) -> Result<SessionId, ConnectionError> {
        loop {
            if let Some(session_id) = self.core.is_authenticating() {
                return Ok(session_id);
            }
            if !self.core.is_alive() {
                return Err(ConnectionError::SessionFailed(
                    self.core.last_error().unwrap_or("unknown error").to_string(),
                ));
            }
            self.progress(&mut ()).await?;
        }
    }

    /// One iteration of the per-connection event loop (§4.6's async
    /// variant): flush queued output, then race a socket read against
    /// nothing else until `Authenticating` (there is no channel-operation
    /// or auth-verification select arm in this core -- that machinery
    /// lives entirely in `callback`, invoked synchronously once the
    /// dispatcher has messages queued). Once authenticated, any packets
    /// the transport handed the dispatcher are parsed and dispatched to
    /// `callback` before returning.
    pub async fn progress(&mut self, callback: &mut impl MessageCallback) -> Result<(), ConnectionError> {
        self.send_off_data().await?;

        let read = self.stream.read(&mut self.buf).await?;
        if read == 0 {
            info!(peer = %self.peer_addr, "connection closed, EOF");
            return Err(ConnectionError::Closed);
        }
        if self.core.recv_bytes(&self.buf[..read]).is_err() {
            let reason = self.core.last_error().unwrap_or("unknown error").to_string();
            warn!(peer = %self.peer_addr, %reason, "session entering Error state");
            return Err(ConnectionError::SessionFailed(reason));
        }

        if self.core.is_authenticating().is_some() {
            self.dispatcher
                .recv_from(&mut self.core)
                .map_err(|err| ConnectionError::SessionFailed(err.to_string()))?;
            self.dispatcher.execute_callbacks(&mut self.core, callback);
        }

        self.send_off_data().await?;
        Ok(())
    }

    async fn send_off_data(&mut self) -> Result<(), ConnectionError> {
        while let Some(msg) = self.core.next_msg_to_send() {
            self.stream.write_all(&msg.to_bytes()).await?;
        }
        Ok(())
    }
}

impl MessageCallback for () {
    fn on_message(
        &mut self,
        _dispatcher: &mut ssh_connection::MessageDispatcher,
        _connection: &mut CoreConnection,
        _message: &ssh_connection::Message,
    ) -> ssh_connection::CallbackResult {
        ssh_connection::CallbackResult::Declined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_without_host_keys_fails() {
        let err = ServerListener::bind("127.0.0.1:0", &[], b"SSH-2.0-ssh-server-tokio_0.1\r\n".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::NoHostKeys));
    }
}
