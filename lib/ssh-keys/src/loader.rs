use std::path::Path;

use dsa::pkcs8::DecodePrivateKey as DsaDecodePrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey as RsaDecodePrivateKey;

use tracing::debug;

use crate::private::{PlaintextPrivateKey, PrivateKey};
use crate::public::PublicKey;
use crate::KeyAlgorithm;

#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    #[error("could not read key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid PEM file")]
    NotPem { path: String },
    #[error("{path} does not contain a {expected} private key")]
    WrongAlgorithm { path: String, expected: &'static str },
    #[error("failed to parse private key in {path}: {message}")]
    Parse { path: String, message: String },
}

/// The `KeyLoader` capability (§6): parses private key files from disk and
/// derives their public halves.
pub trait KeyLoader {
    fn load_private_key(
        &self,
        path: &Path,
        expected_type: KeyAlgorithm,
    ) -> Result<PlaintextPrivateKey, KeyLoadError>;

    fn public_from_private(&self, private: &PrivateKey) -> PublicKey {
        private.public_key()
    }

    fn serialize_public(&self, public: &PublicKey) -> Vec<u8> {
        public.to_wire_encoding()
    }
}

/// Loads PEM-encoded, unencrypted PKCS#1/PKCS#8 RSA and DSA private keys
/// from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileKeyLoader;

impl KeyLoader for FileKeyLoader {
    fn load_private_key(
        &self,
        path: &Path,
        expected_type: KeyAlgorithm,
    ) -> Result<PlaintextPrivateKey, KeyLoadError> {
        let data = std::fs::read_to_string(path).map_err(|source| KeyLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let pem = pem::parse(&data).map_err(|_| KeyLoadError::NotPem {
            path: path.display().to_string(),
        })?;

        let private_key = match expected_type {
            KeyAlgorithm::Rsa => {
                let key = RsaDecodePrivateKey::from_pkcs8_der(pem.contents())
                    .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_der(pem.contents()))
                    .map_err(|err| KeyLoadError::Parse {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    })?;
                PrivateKey::Rsa(key)
            }
            KeyAlgorithm::Dsa => {
                let key = DsaDecodePrivateKey::from_pkcs8_der(pem.contents()).map_err(|err| {
                    KeyLoadError::Parse {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    }
                })?;
                PrivateKey::Dsa(key)
            }
        };

        if private_key.algorithm() != expected_type {
            return Err(KeyLoadError::WrongAlgorithm {
                path: path.display().to_string(),
                expected: expected_type.name(),
            });
        }

        debug!(path = %path.display(), algorithm = expected_type.name(), "loaded host key");
        Ok(PlaintextPrivateKey { private_key })
    }
}
