//! The `Crypto` capability (§6): classic Diffie-Hellman key exchange over
//! `ssh-rsa`/`ssh-dss` host keys, the symmetric cipher/MAC suite, session
//! key derivation, and algorithm negotiation bookkeeping.
//!
//! Kept deliberately narrow: this crate knows nothing about packet framing
//! or the session state machine, only about turning negotiated algorithm
//! names and raw key material into usable crypto.

pub mod dh;
pub mod encrypt;

use num_bigint_dig::BigUint;
use rand_core::RngCore;
use secrecy::ExposeSecret;
use sha2::Digest;
use ssh_format::{fixup_mpint, NameList};
use ssh_keys::public::PublicKey;
use ssh_keys::signature::Signature;

pub use dh::{group_by_name, DhGroup, InvalidPeerValue, DH_GROUP14_SHA1, DH_GROUP1_SHA1};
pub use encrypt::{CipherStream, EncryptionAlgorithm, MacAlgorithm, ENC_AES128_CTR, ENC_AES256_CTR, ENC_NONE};

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("peer does not support any algorithm we offer in this slot (we offer: {we_support}, peer offers: {peer_offers})")]
    NoMatchingAlgorithm {
        we_support: String,
        peer_offers: String,
    },
    #[error(transparent)]
    InvalidPeerValue(#[from] InvalidPeerValue),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Source of cryptographically secure randomness, injected so tests can use
/// a deterministic double instead of the OS RNG.
pub trait SshRng {
    fn fill_bytes(&mut self, dest: &mut [u8]);
}

pub struct OsRng;
impl SshRng for OsRng {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::OsRng.fill_bytes(dest);
    }
}

/// Adapts an `SshRng` to the `rand_core::RngCore` interface the bignum
/// crate's `RandBigInt` extension trait expects.
pub(crate) struct SshRngRandAdapter<'a>(pub &'a mut dyn SshRng);
impl RngCore for SshRngRandAdapter<'_> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0; 4];
        self.0.fill_bytes(&mut bytes);
        u32::from_ne_bytes(bytes)
    }
    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0; 8];
        self.0.fill_bytes(&mut bytes);
        u64::from_ne_bytes(bytes)
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
        self.0.fill_bytes(dest);
        Ok(())
    }
}

/// The shared secret `K`, zeroized on drop.
pub type SharedSecret = secrecy::Secret<SharedSecretInner>;

#[derive(Clone)]
pub struct SharedSecretInner(pub Vec<u8>);
impl secrecy::Zeroize for SharedSecretInner {
    fn zeroize(&mut self) {
        secrecy::Zeroize::zeroize(&mut self.0);
    }
}
impl secrecy::CloneableSecret for SharedSecretInner {}

pub trait AlgorithmName {
    fn name(&self) -> &'static str;
}
impl AlgorithmName for &'static str {
    fn name(&self) -> &'static str {
        self
    }
}

/// A server-side DH secret in progress: the group to use, and (once
/// generated) `y` and `f`.
#[derive(Clone, Copy)]
pub struct KexAlgorithm {
    group: DhGroup,
}
impl AlgorithmName for KexAlgorithm {
    fn name(&self) -> &'static str {
        self.group.name
    }
}

pub fn kex_algorithm_by_name(name: &str) -> Option<KexAlgorithm> {
    group_by_name(name).map(|group| KexAlgorithm { group })
}

pub struct ServerDhSecret {
    y: BigUint,
    pub f: BigUint,
    group: DhGroup,
}

impl KexAlgorithm {
    /// Step 3 of §4.2: generate a fresh `y` and compute `f`.
    pub fn generate_secret(&self, rng: &mut dyn SshRng) -> ServerDhSecret {
        let (y, f) = self.group.generate_y_f(rng);
        ServerDhSecret { y, f, group: self.group }
    }
}

impl ServerDhSecret {
    pub fn f_bytes(&self) -> Vec<u8> {
        self.f.to_bytes_be()
    }

    /// Step 2 (validity check) and step 6 (`K = e^y mod p`) of §4.2.
    pub fn compute_k(&self, e: &[u8]) -> Result<SharedSecret> {
        let e = BigUint::from_bytes_be(e);
        Ok(self.group.compute_k(&e, &self.y)?)
    }
}

/// A host key usable for signing the exchange hash, paired with its public
/// half for inclusion in `KEXDH_REPLY`.
#[derive(Clone)]
pub struct HostKeySigningAlgorithm {
    public_key: PublicKey,
}
impl AlgorithmName for HostKeySigningAlgorithm {
    fn name(&self) -> &'static str {
        self.public_key.algorithm_name()
    }
}
impl HostKeySigningAlgorithm {
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }
    pub fn public_key(&self) -> PublicKey {
        self.public_key.clone()
    }
}

pub struct HostKeyVerifyAlgorithm {
    name: &'static str,
}
impl AlgorithmName for HostKeyVerifyAlgorithm {
    fn name(&self) -> &'static str {
        self.name
    }
}
pub const HOSTKEY_VERIFY_RSA: HostKeyVerifyAlgorithm = HostKeyVerifyAlgorithm { name: "ssh-rsa" };
pub const HOSTKEY_VERIFY_DSA: HostKeyVerifyAlgorithm = HostKeyVerifyAlgorithm { name: "ssh-dss" };

/// Negotiates one algorithm slot: the server's ordered preference list
/// against the peer's offered name-list (§4.7).
pub struct AlgorithmNegotiation<T> {
    pub supported: Vec<T>,
}

impl<T: AlgorithmName> AlgorithmNegotiation<T> {
    pub fn to_name_list(&self) -> String {
        self.supported
            .iter()
            .map(|alg| alg.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The negotiated choice is the first entry in the *server's* list that
    /// also appears in the peer's list (§4.7) -- this server never defers
    /// to the client's ordering, unlike the client-guided RFC 4253 §7.1
    /// algorithm a client-role implementation would use.
    pub fn find(mut self, peer_supports: NameList<'_>) -> Result<T> {
        let peer_algs: Vec<&str> = peer_supports.iter().collect();

        for i in 0..self.supported.len() {
            if peer_algs.contains(&self.supported[i].name()) {
                return Ok(self.supported.remove(i));
            }
        }

        Err(CryptoError::NoMatchingAlgorithm {
            we_support: self.to_name_list(),
            peer_offers: peer_supports.0.to_string(),
        })
    }
}

/// The 10 algorithm slots of a `KEXINIT` exchange (§4.7), with the
/// server's preferences already materialized (set either by listener
/// configuration or these built-in defaults).
pub struct SupportedAlgorithms {
    pub kex: AlgorithmNegotiation<KexAlgorithm>,
    pub host_key: AlgorithmNegotiation<HostKeySigningAlgorithm>,
    pub cipher_c2s: AlgorithmNegotiation<EncryptionAlgorithm>,
    pub cipher_s2c: AlgorithmNegotiation<EncryptionAlgorithm>,
    pub mac_c2s: AlgorithmNegotiation<MacAlgorithm>,
    pub mac_s2c: AlgorithmNegotiation<MacAlgorithm>,
    pub compression_c2s: AlgorithmNegotiation<&'static str>,
    pub compression_s2c: AlgorithmNegotiation<&'static str>,
    pub language_c2s: AlgorithmNegotiation<&'static str>,
    pub language_s2c: AlgorithmNegotiation<&'static str>,
}

impl SupportedAlgorithms {
    /// Built-in defaults. `host_keys` is the set of host keys this listener
    /// has loaded; the default host-key algorithm list is derived from it
    /// per §4.7 ("both -> ssh-dss,ssh-rsa; DSA only -> ssh-dss; RSA only ->
    /// ssh-rsa").
    pub fn defaults(host_keys: &[PublicKey]) -> Self {
        let mut supported_host_keys: Vec<HostKeySigningAlgorithm> = Vec::new();
        let has_dsa = host_keys.iter().any(|k| matches!(k, PublicKey::Dsa { .. }));
        let has_rsa = host_keys.iter().any(|k| matches!(k, PublicKey::Rsa { .. }));
        if has_dsa {
            if let Some(k) = host_keys.iter().find(|k| matches!(k, PublicKey::Dsa { .. })) {
                supported_host_keys.push(HostKeySigningAlgorithm::new(k.clone()));
            }
        }
        if has_rsa {
            if let Some(k) = host_keys.iter().find(|k| matches!(k, PublicKey::Rsa { .. })) {
                supported_host_keys.push(HostKeySigningAlgorithm::new(k.clone()));
            }
        }

        Self {
            kex: AlgorithmNegotiation {
                supported: vec![
                    kex_algorithm_by_name("diffie-hellman-group14-sha1").unwrap(),
                    kex_algorithm_by_name("diffie-hellman-group1-sha1").unwrap(),
                ],
            },
            host_key: AlgorithmNegotiation {
                supported: supported_host_keys,
            },
            cipher_c2s: AlgorithmNegotiation {
                supported: vec![ENC_AES256_CTR, ENC_AES128_CTR],
            },
            cipher_s2c: AlgorithmNegotiation {
                supported: vec![ENC_AES256_CTR, ENC_AES128_CTR],
            },
            mac_c2s: AlgorithmNegotiation {
                supported: vec![MAC_HMAC_SHA2_256, MAC_HMAC_SHA1],
            },
            mac_s2c: AlgorithmNegotiation {
                supported: vec![MAC_HMAC_SHA2_256, MAC_HMAC_SHA1],
            },
            compression_c2s: AlgorithmNegotiation {
                supported: vec!["none"],
            },
            compression_s2c: AlgorithmNegotiation {
                supported: vec!["none"],
            },
            language_c2s: AlgorithmNegotiation { supported: vec![] },
            language_s2c: AlgorithmNegotiation { supported: vec![] },
        }
    }
}
pub use encrypt::{MAC_HMAC_SHA1, MAC_HMAC_SHA2_256, MAC_NONE};

/// Derived session keys and MAC keys for one direction (RFC 4253 §7.2).
pub struct DirectionKeys {
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
    pub mac_key: Vec<u8>,
}

pub struct SessionKeys {
    pub client_to_server: DirectionKeys,
    pub server_to_client: DirectionKeys,
}

/// Derives all six session secrets from `(K, H, session_id)` (§4.3: "derive
/// session keys from (K, H, session-id)").
pub fn derive_keys(
    k: &SharedSecret,
    h: [u8; 20],
    session_id: [u8; 20],
    cipher_c2s: EncryptionAlgorithm,
    cipher_s2c: EncryptionAlgorithm,
    mac_c2s: MacAlgorithm,
    mac_s2c: MacAlgorithm,
) -> SessionKeys {
    SessionKeys {
        client_to_server: DirectionKeys {
            iv: derive_key(k, h, 'A', session_id, cipher_c2s.iv_size),
            key: derive_key(k, h, 'C', session_id, cipher_c2s.key_size),
            mac_key: derive_key(k, h, 'E', session_id, mac_c2s.key_size),
        },
        server_to_client: DirectionKeys {
            iv: derive_key(k, h, 'B', session_id, cipher_s2c.iv_size),
            key: derive_key(k, h, 'D', session_id, cipher_s2c.key_size),
            mac_key: derive_key(k, h, 'F', session_id, mac_s2c.key_size),
        },
    }
}

/// RFC 4253 §7.2's `HASH(K || H || letter || session_id)` construction,
/// extended with further hash iterations when more key material is needed
/// than one hash output provides.
fn derive_key(k: &SharedSecret, h: [u8; 20], letter: char, session_id: [u8; 20], size: usize) -> Vec<u8> {
    if size == 0 {
        return Vec::new();
    }
    let hashlen = sha1::Sha1::output_size();
    let padded = size.next_multiple_of(hashlen);
    let mut output = vec![0u8; padded];

    for i in 0..(padded / hashlen) {
        let mut hash = sha1::Sha1::new();
        encode_mpint_for_hash(k.expose_secret().0.as_slice(), |data| hash.update(data));
        hash.update(h);
        if i == 0 {
            hash.update([letter as u8]);
            hash.update(session_id);
        } else {
            hash.update(&output[..(i * hashlen)]);
        }
        output[(i * hashlen)..][..hashlen].copy_from_slice(&hash.finalize());
    }

    output.truncate(size);
    output
}

pub(crate) fn encode_mpint_for_hash(key: &[u8], mut add_to_hash: impl FnMut(&[u8])) {
    let (key, pad_zero) = fixup_mpint(key);
    add_to_hash(&u32::to_be_bytes((key.len() + pad_zero as usize) as u32));
    if pad_zero {
        add_to_hash(&[0]);
    }
    add_to_hash(key);
}

/// Computes the key-exchange hash `H` over the canonical concatenation
/// described in §4.2 step 7: client banner, server banner, client and
/// server `KEXINIT` payloads, server host-key blob, `e`, `f`, `K`.
///
/// Unlike ECDH's `Q_C`/`Q_S` (hashed as `string`s, RFC 5656 §4), classic DH
/// hashes `e` and `f` as `mpint`s (RFC 4253 §8) -- the detail that made the
/// elliptic-curve hash construction this function is grounded on unusable
/// as-is and required adaptation (see DESIGN.md).
pub fn key_exchange_hash(
    client_ident: &[u8],
    server_ident: &[u8],
    client_kexinit: &[u8],
    server_kexinit: &[u8],
    server_hostkey: &[u8],
    e: &[u8],
    f: &[u8],
    shared_secret: &SharedSecret,
) -> [u8; 20] {
    let mut hash = sha1::Sha1::new();
    let hash_string = |hash: &mut sha1::Sha1, bytes: &[u8]| {
        hash.update(u32::to_be_bytes(bytes.len() as u32));
        hash.update(bytes);
    };
    let hash_mpint = |hash: &mut sha1::Sha1, bytes: &[u8]| {
        encode_mpint_for_hash(bytes, |data| hash.update(data));
    };

    // `client_ident` arrives already stripped of its trailing \r\n (the
    // banner parser consumes the terminator); `server_ident` is the raw
    // wire banner this session sent, \r\n included, so only it needs
    // trimming here.
    hash_string(&mut hash, client_ident); // V_C
    hash_string(&mut hash, &server_ident[..server_ident.len() - 2]); // V_S
    hash_string(&mut hash, client_kexinit); // I_C
    hash_string(&mut hash, server_kexinit); // I_S
    hash_string(&mut hash, server_hostkey); // K_S
    hash_mpint(&mut hash, e); // e
    hash_mpint(&mut hash, f); // f
    hash_mpint(&mut hash, shared_secret.expose_secret().0.as_slice()); // K

    hash.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssh_format::NameList;

    #[test]
    fn negotiation_prefers_servers_order() {
        let negotiation = AlgorithmNegotiation {
            supported: vec!["b", "a", "c"],
        };
        let chosen = negotiation.find(NameList::multi("a,b")).unwrap();
        assert_eq!(chosen, "b");
    }

    #[test]
    fn negotiation_fails_without_intersection() {
        let negotiation = AlgorithmNegotiation {
            supported: vec!["a"],
        };
        assert!(negotiation.find(NameList::multi("z")).is_err());
    }
}
