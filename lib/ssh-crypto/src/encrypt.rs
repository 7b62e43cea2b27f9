//! Symmetric cipher and MAC suite consumed by the transport's packet layer.
//!
//! Packet confidentiality uses AES in CTR mode (RFC 4344 §4); integrity is
//! a separate HMAC over the plaintext packet (RFC 4253 §6.4), not an AEAD
//! construction, matching the classic (non-`*-gcm`/ChaCha20-Poly1305)
//! cipher suite this server negotiates.

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::AlgorithmName;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionAlgorithm {
    name: &'static str,
    pub key_size: usize,
    pub iv_size: usize,
}
impl AlgorithmName for EncryptionAlgorithm {
    fn name(&self) -> &'static str {
        self.name
    }
}

pub const ENC_AES256_CTR: EncryptionAlgorithm = EncryptionAlgorithm {
    name: "aes256-ctr",
    key_size: 32,
    iv_size: 16,
};
pub const ENC_AES128_CTR: EncryptionAlgorithm = EncryptionAlgorithm {
    name: "aes128-ctr",
    key_size: 16,
    iv_size: 16,
};
pub const ENC_NONE: EncryptionAlgorithm = EncryptionAlgorithm {
    name: "none",
    key_size: 0,
    iv_size: 0,
};

impl EncryptionAlgorithm {
    /// Builds the stateful keystream for one direction, seeded once at
    /// `NEWKEYS` time. The counter must run continuously across every
    /// packet sent or received in that direction for the session's
    /// lifetime -- re-seeding per packet would reuse keystream bytes
    /// across packets, breaking CTR mode's confidentiality guarantee.
    pub fn stream(&self, key: &[u8], iv: &[u8]) -> CipherStream {
        match self.name {
            "aes256-ctr" => CipherStream::Aes256Ctr(Box::new(Aes256Ctr::new(key.into(), iv.into()))),
            "aes128-ctr" => CipherStream::Aes128Ctr(Box::new(Aes128Ctr::new(key.into(), iv.into()))),
            "none" => CipherStream::None,
            other => unreachable!("unsupported cipher negotiated: {other}"),
        }
    }
}

/// A direction's running CTR keystream (or no-op, pre-`NEWKEYS`/`none`).
/// Bytes must be fed to [`Self::apply`] in wire order -- the underlying
/// counter advances with every byte processed and cannot be rewound, which
/// is exactly what lets a receiver decrypt a packet's length prefix as
/// soon as its first four bytes arrive, before the rest of the packet has
/// even been read off the wire.
pub enum CipherStream {
    None,
    Aes128Ctr(Box<Aes128Ctr>),
    Aes256Ctr(Box<Aes256Ctr>),
}

impl CipherStream {
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            CipherStream::None => {}
            CipherStream::Aes128Ctr(cipher) => cipher.apply_keystream(data),
            CipherStream::Aes256Ctr(cipher) => cipher.apply_keystream(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAlgorithm {
    name: &'static str,
    pub key_size: usize,
    pub tag_size: usize,
}
impl AlgorithmName for MacAlgorithm {
    fn name(&self) -> &'static str {
        self.name
    }
}

pub const MAC_HMAC_SHA2_256: MacAlgorithm = MacAlgorithm {
    name: "hmac-sha2-256",
    key_size: 32,
    tag_size: 32,
};
pub const MAC_HMAC_SHA1: MacAlgorithm = MacAlgorithm {
    name: "hmac-sha1",
    key_size: 20,
    tag_size: 20,
};
pub const MAC_NONE: MacAlgorithm = MacAlgorithm {
    name: "none",
    key_size: 0,
    tag_size: 0,
};

impl MacAlgorithm {
    /// Computes the MAC over `sequence_number || packet` (RFC 4253 §6.4).
    pub fn compute(&self, key: &[u8], sequence_number: u32, packet: &[u8]) -> Vec<u8> {
        match self.name {
            "hmac-sha2-256" => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("any key length valid");
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            "hmac-sha1" => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("any key length valid");
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            "none" => Vec::new(),
            other => unreachable!("unsupported mac negotiated: {other}"),
        }
    }
}
