//! The Listener/Acceptor (§4.1): binds a TCP socket and turns each
//! accepted connection into a fresh [`ServerConnection`].

use std::net::{TcpListener as StdTcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;

use socket2::{Domain, Socket, Type};
use ssh_keys::{FileKeyLoader, KeyLoadError, KeyLoader};
use ssh_keys::KeyAlgorithm;

use crate::server::{HostKeySlots, ServerConfig, ServerConnection};
use ssh_crypto::OsRng;

/// How many pending connections the kernel will queue before `accept`
/// starts refusing them.
const LISTEN_BACKLOG: i32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("no host keys configured, a listener needs at least one")]
    NoHostKeys,
    #[error("could not resolve bind address: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("bind address resolved to no addresses")]
    NoAddresses,
    #[error("could not create or bind socket: {0}")]
    Socket(#[source] std::io::Error),
    #[error("could not load host key: {0}")]
    KeyLoad(#[from] KeyLoadError),
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("accept() failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Host key material the listener loaded once at bind time, cloned into a
/// fresh [`HostKeySlots`] for each accepted connection.
struct LoadedHostKeys {
    rsa: Option<ssh_keys::PrivateKey>,
    dsa: Option<ssh_keys::PrivateKey>,
}

impl LoadedHostKeys {
    fn fresh_slots(&self) -> HostKeySlots {
        HostKeySlots {
            rsa: self
                .rsa
                .clone()
                .map(|private_key| ssh_keys::PlaintextPrivateKey { private_key }),
            dsa: self
                .dsa
                .clone()
                .map(|private_key| ssh_keys::PlaintextPrivateKey { private_key }),
        }
    }
}

/// A path to a private host key file, tagged with the algorithm it must
/// contain.
pub struct HostKeyPath {
    pub algorithm: KeyAlgorithm,
    pub path: PathBuf,
}

pub struct Listener {
    tcp: StdTcpListener,
    host_keys: LoadedHostKeys,
    server_identification: Vec<u8>,
}

impl Listener {
    /// Resolves `addr` with the platform's modern, address-family-agnostic
    /// resolver (`ToSocketAddrs`, backed by `getaddrinfo`) rather than the
    /// legacy, IPv4-only `gethostbyname` family of calls, loads every
    /// configured host key, and binds with `SO_REUSEADDR` and a backlog of
    /// 10 (§4.1).
    pub fn bind(
        addr: impl ToSocketAddrs,
        host_key_paths: &[HostKeyPath],
        server_identification: Vec<u8>,
    ) -> Result<Self, BindError> {
        if host_key_paths.is_empty() {
            return Err(BindError::NoHostKeys);
        }

        let bind_addr = addr
            .to_socket_addrs()
            .map_err(BindError::Resolve)?
            .next()
            .ok_or(BindError::NoAddresses)?;

        let domain = if bind_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None).map_err(BindError::Socket)?;
        socket.set_reuse_address(true).map_err(BindError::Socket)?;
        socket.bind(&bind_addr.into()).map_err(BindError::Socket)?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(BindError::Socket)?;
        socket.set_nonblocking(false).map_err(BindError::Socket)?;
        let tcp: StdTcpListener = socket.into();

        let loader = FileKeyLoader;
        let mut host_keys = LoadedHostKeys { rsa: None, dsa: None };
        for entry in host_key_paths {
            let loaded = loader.load_private_key(&entry.path, entry.algorithm)?;
            match entry.algorithm {
                KeyAlgorithm::Rsa => host_keys.rsa = Some(loaded.private_key),
                KeyAlgorithm::Dsa => host_keys.dsa = Some(loaded.private_key),
            }
        }

        Ok(Self {
            tcp,
            host_keys,
            server_identification,
        })
    }

    /// Blocks until a peer connects, returning the raw stream alongside a
    /// freshly constructed [`ServerConnection`] seeded with this
    /// listener's host keys (§4.1: "each accepted connection gets its own
    /// session struct").
    pub fn accept(&self) -> Result<(TcpStream, ServerConnection), AcceptError> {
        let (stream, _peer_addr) = self.tcp.accept().map_err(AcceptError::Io)?;
        let config = ServerConfig {
            server_identification: self.server_identification.clone(),
        };
        let connection = ServerConnection::new(OsRng, config, self.host_keys.fresh_slots());
        Ok((stream, connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_without_host_keys_fails() {
        let err = Listener::bind(
            "127.0.0.1:0",
            &[],
            b"SSH-2.0-ssh-transport_0.1\r\n".to_vec(),
        )
        .unwrap_err();
        assert!(matches!(err, BindError::NoHostKeys));
    }
}
