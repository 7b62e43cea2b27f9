use ssh_format::{Reader, Writer};

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("unknown signature algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("malformed signature blob: {0}")]
    Malformed(#[from] ssh_format::FormatError),
    #[error("dsa signature must be exactly 40 bytes, was {0}")]
    BadDsaLength(usize),
}

/// An SSH signature blob (RFC 4253 §6.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// RSASSA-PKCS1-v1_5 signature over SHA-1, raw bytes.
    Rsa(Vec<u8>),
    /// `r || s`, each zero-padded to 20 bytes (RFC 4253 §6.6).
    Dsa([u8; 40]),
}

impl Signature {
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Signature::Rsa(_) => "ssh-rsa",
            Signature::Dsa(_) => "ssh-dss",
        }
    }

    pub fn to_wire_encoding(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Signature::Rsa(sig) => {
                w.string(b"ssh-rsa");
                w.string(sig);
            }
            Signature::Dsa(sig) => {
                w.string(b"ssh-dss");
                w.string(sig);
            }
        }
        w.finish()
    }

    pub fn from_wire_encoding(bytes: &[u8]) -> Result<Self, SignatureError> {
        let mut r = Reader::new(bytes);
        let format = r.string()?;
        let blob = r.string()?;
        match format {
            b"ssh-rsa" => Ok(Signature::Rsa(blob.to_vec())),
            b"ssh-dss" => {
                let arr: [u8; 40] = blob
                    .try_into()
                    .map_err(|_| SignatureError::BadDsaLength(blob.len()))?;
                Ok(Signature::Dsa(arr))
            }
            other => Err(SignatureError::UnknownAlgorithm(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}
