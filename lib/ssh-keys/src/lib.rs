//! Host key types, loading and signing.
//!
//! This crate implements the `KeyLoader` capability: parsing private key
//! files from disk and deriving their public halves and wire encodings.
//! Only the two classic host-key algorithms are supported: `ssh-rsa` and
//! `ssh-dss`.

pub mod loader;
pub mod private;
pub mod public;
pub mod signature;

pub use loader::{FileKeyLoader, KeyLoadError, KeyLoader};
pub use private::{PlaintextPrivateKey, PrivateKey};
pub use public::PublicKey;
pub use signature::Signature;

/// The two host-key algorithms this crate (and the transport built on top
/// of it) understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
}

impl KeyAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "ssh-rsa",
            KeyAlgorithm::Dsa => "ssh-dss",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ssh-rsa" => Some(KeyAlgorithm::Rsa),
            "ssh-dss" => Some(KeyAlgorithm::Dsa),
            _ => None,
        }
    }
}
