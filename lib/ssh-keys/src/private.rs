use dsa::SigningKey as DsaSigningKey;
use num_bigint_dig::BigUint;
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::RsaPrivateKey;
use signature::{SignatureEncoding, Signer};

use crate::public::PublicKey;
use crate::signature::Signature;
use crate::KeyAlgorithm;

/// A private host key, held in memory only for as long as it takes to sign
/// one key exchange hash.
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(RsaPrivateKey),
    Dsa(DsaSigningKey),
}

impl PrivateKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PrivateKey::Rsa(_) => KeyAlgorithm::Rsa,
            PrivateKey::Dsa(_) => KeyAlgorithm::Dsa,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => {
                let public = key.to_public_key();
                PublicKey::Rsa {
                    e: biguint_from_rsa(public.e()),
                    n: biguint_from_rsa(public.n()),
                }
            }
            PrivateKey::Dsa(key) => {
                let components = key.verifying_key().components();
                PublicKey::Dsa {
                    p: components.p().clone(),
                    q: components.q().clone(),
                    g: components.g().clone(),
                    y: key.verifying_key().y().clone(),
                }
            }
        }
    }

    /// Signs `data` (the exchange hash `H`) under this key's algorithm.
    ///
    /// `ssh-rsa` signatures use RSASSA-PKCS1-v1_5 over SHA-1 (RFC 4253
    /// §6.6); `ssh-dss` signatures are a raw `r || s` pair, each 20 bytes.
    pub fn sign(&self, data: &[u8]) -> Signature {
        match self {
            PrivateKey::Rsa(key) => {
                let signing_key = RsaSigningKey::<sha1::Sha1>::new(key.clone());
                let sig = signing_key.sign(data);
                Signature::Rsa(sig.to_bytes().to_vec())
            }
            PrivateKey::Dsa(key) => {
                let sig: dsa::Signature = key.sign(data);
                let mut out = [0u8; 40];
                let r = sig.r().to_bytes_be();
                let s = sig.s().to_bytes_be();
                out[(20 - r.len())..20].copy_from_slice(&r);
                out[20 + (20 - s.len())..].copy_from_slice(&s);
                Signature::Dsa(out)
            }
        }
    }
}

/// `rsa`'s internal `BigUint` (from `crypto-bigint`) re-expressed as the
/// `num-bigint-dig` type this crate's wire encoding uses.
fn biguint_from_rsa(v: &rsa::BigUint) -> BigUint {
    BigUint::from_bytes_be(&v.to_bytes_be())
}

/// A private key paired with its already-known algorithm name, as produced
/// by the `KeyLoader`. Mirrors the teacher's `PlaintextPrivateKey` shape: a
/// key that is known to be usable immediately, as opposed to one still
/// wrapped by passphrase encryption.
pub struct PlaintextPrivateKey {
    pub private_key: PrivateKey,
}

impl PlaintextPrivateKey {
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.private_key.sign(data)
    }
}
