use num_bigint_dig::BigUint;
use ssh_format::{Reader, Writer};

use crate::KeyAlgorithm;

#[derive(Debug, thiserror::Error)]
pub enum PublicKeyError {
    #[error("unknown public key algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("malformed public key blob: {0}")]
    Malformed(#[from] ssh_format::FormatError),
}

/// An SSH public host key, in the two classic shapes this server supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa { e: BigUint, n: BigUint },
    Dsa { p: BigUint, q: BigUint, g: BigUint, y: BigUint },
}

impl PublicKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKey::Rsa { .. } => KeyAlgorithm::Rsa,
            PublicKey::Dsa { .. } => KeyAlgorithm::Dsa,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm().name()
    }

    /// The public key blob as it appears on the wire (RFC 4253 §6.6), e.g.
    /// as `K_S` in the exchange hash or the payload of `USERAUTH_PK_OK`.
    pub fn to_wire_encoding(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            PublicKey::Rsa { e, n } => {
                w.string(b"ssh-rsa");
                w.mpint_bytes(&e.to_bytes_be());
                w.mpint_bytes(&n.to_bytes_be());
            }
            PublicKey::Dsa { p, q, g, y } => {
                w.string(b"ssh-dss");
                w.mpint_bytes(&p.to_bytes_be());
                w.mpint_bytes(&q.to_bytes_be());
                w.mpint_bytes(&g.to_bytes_be());
                w.mpint_bytes(&y.to_bytes_be());
            }
        }
        w.finish()
    }

    pub fn from_wire_encoding(bytes: &[u8]) -> Result<Self, PublicKeyError> {
        let mut r = Reader::new(bytes);
        let format = r.string()?;
        match format {
            b"ssh-rsa" => {
                let e = BigUint::from_bytes_be(r.mpint()?.as_positive_bytes());
                let n = BigUint::from_bytes_be(r.mpint()?.as_positive_bytes());
                Ok(PublicKey::Rsa { e, n })
            }
            b"ssh-dss" => {
                let p = BigUint::from_bytes_be(r.mpint()?.as_positive_bytes());
                let q = BigUint::from_bytes_be(r.mpint()?.as_positive_bytes());
                let g = BigUint::from_bytes_be(r.mpint()?.as_positive_bytes());
                let y = BigUint::from_bytes_be(r.mpint()?.as_positive_bytes());
                Ok(PublicKey::Dsa { p, q, g, y })
            }
            other => Err(PublicKeyError::UnknownAlgorithm(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_roundtrip() {
        let key = PublicKey::Rsa {
            e: BigUint::from(65537u32),
            n: BigUint::from(0x00ffeeu32),
        };
        let blob = key.to_wire_encoding();
        let parsed = PublicKey::from_wire_encoding(&blob).unwrap();
        assert_eq!(key, parsed);
    }
}
