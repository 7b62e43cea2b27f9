//! The server-side core of an SSH2 protocol engine: turns an accepted TCP
//! connection into an authenticated, encrypted transport ready to carry
//! channel traffic.
//!
//! This crate owns the Transport Packet Interface, the Key Exchange
//! Engine, the Session State Machine, the Listener/Acceptor, and the
//! blocking Connection Driver (§4.1-§4.4, §4.6-§4.7 of the design). The
//! Message Dispatcher that runs once a session reaches `Authenticating`
//! lives in `ssh-connection`.

pub mod listener;
pub mod packet;
pub mod pump;
pub mod server;

pub use listener::{AcceptError, BindError, HostKeyPath, Listener};
pub use pump::{drive_to_authenticated, pump_packets, DriverError, PumpOutcome, PumpTimeout};
pub use server::{HostKeySlots, ServerConfig, ServerConnection};

/// The exchange hash of the first key exchange, immutable for the life of
/// the session (§3: "Session-id, immutable once set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub [u8; 20]);

/// Errors surfaced by the transport (§7). Any of these drives the session
/// state machine into its `Error` terminal state.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("could not resolve bind address: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("socket I/O error: {0}")]
    SocketIo(#[source] std::io::Error),
    #[error("peer's identification banner exceeded 128 bytes without a newline")]
    BannerTooLarge,
    #[error("peer's identification banner was malformed: {0}")]
    BannerMalformed(String),
    #[error("peer does not support SSH protocol version 2")]
    ProtocolVersion,
    #[error(transparent)]
    AlgorithmMismatch(#[from] ssh_crypto::CryptoError),
    #[error("key exchange protocol violation: {0}")]
    KexProtocol(String),
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("packet encoding error: {0}")]
    PacketEncoding(#[from] ssh_format::FormatError),
}

/// The outcome of a failed operation: either the peer cleanly closed the
/// connection (not an error worth logging loudly), or a fatal transport
/// error that must move the session to `Error`.
#[derive(Debug, thiserror::Error)]
pub enum SshStatus {
    #[error("peer disconnected")]
    Disconnect,
    #[error(transparent)]
    Fatal(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SshStatus>;

/// Lets `?` convert a wire-format error straight into a fatal session
/// status without an intermediate `.map_err(TransportError::from)`, since
/// packet parsing happens deep inside state-machine code that already
/// returns `Result<_, SshStatus>`.
impl From<ssh_format::FormatError> for SshStatus {
    fn from(err: ssh_format::FormatError) -> Self {
        SshStatus::Fatal(TransportError::PacketEncoding(err))
    }
}

/// Constructs a fatal [`SshStatus`] from a protocol violation observed in
/// peer-supplied data, in the style of the original implementation's
/// `peer_error!`/`client_error!` helpers.
#[macro_export]
macro_rules! peer_error {
    ($($arg:tt)*) => {
        $crate::SshStatus::Fatal($crate::TransportError::KexProtocol(format!($($arg)*)))
    };
}

/// A chunk of output ready to be written to the peer, either the plaintext
/// banner line, a plaintext packet (only ever sent pre-KEX), or a fully
/// encrypted-and-MACed packet.
pub enum Msg {
    ServerProtocolInfo(Vec<u8>),
    PlaintextPacket(packet::Packet),
    EncryptedPacket(Vec<u8>),
}

impl Msg {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Msg::ServerProtocolInfo(banner) => banner.clone(),
            Msg::PlaintextPacket(packet) => packet.to_bytes(),
            Msg::EncryptedPacket(bytes) => bytes.clone(),
        }
    }
}
