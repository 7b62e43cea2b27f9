//! Classic finite-field Diffie-Hellman groups (RFC 2409 §6.2, RFC 3526
//! §3), used by `diffie-hellman-group1-sha1` and `diffie-hellman-group14-sha1`.

use num_bigint_dig::{BigUint, RandBigInt};
use num_traits::Num;

use crate::{SharedSecret, SharedSecretInner, SshRng, SshRngRandAdapter};

/// Oakley Group 2, 1024 bits (the MODP group `diffie-hellman-group1-sha1`
/// actually names, despite the "group1" in its SSH algorithm name).
/// Offered only for interoperability with very old clients;
/// `diffie-hellman-group14-sha1` is preferred whenever both sides support it.
const GROUP1_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
    "FFFFFFFFFFFFFFFF",
);

/// Oakley Group 14, 2048 bits.
const GROUP14_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF69558171839954 97CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhGroup {
    pub name: &'static str,
    prime_hex: &'static str,
    generator: u64,
}

pub const DH_GROUP14_SHA1: DhGroup = DhGroup {
    name: "diffie-hellman-group14-sha1",
    prime_hex: GROUP14_PRIME_HEX,
    generator: 2,
};

pub const DH_GROUP1_SHA1: DhGroup = DhGroup {
    name: "diffie-hellman-group1-sha1",
    prime_hex: GROUP1_PRIME_HEX,
    generator: 2,
};

pub const ALL_GROUPS: [DhGroup; 2] = [DH_GROUP14_SHA1, DH_GROUP1_SHA1];

pub fn group_by_name(name: &str) -> Option<DhGroup> {
    ALL_GROUPS.into_iter().find(|g| g.name == name)
}

impl DhGroup {
    fn prime(&self) -> BigUint {
        BigUint::from_str_radix(&self.prime_hex.replace(' ', ""), 16)
            .expect("hardcoded DH group prime is valid hex")
    }

    fn generator(&self) -> BigUint {
        BigUint::from(self.generator)
    }

    /// Step 3 of §4.2: generate a fresh secret exponent `y` and compute
    /// `f = g^y mod p`.
    pub fn generate_y_f(&self, rng: &mut dyn SshRng) -> (BigUint, BigUint) {
        let p = self.prime();
        let g = self.generator();
        let mut adapter = SshRngRandAdapter(rng);
        // A secret exponent of the prime's bit length is conservative and
        // matches common server implementations' choice of exponent size.
        let y = adapter.gen_biguint_below(&p);
        let f = g.modpow(&y, &p);
        (y, f)
    }

    /// Validates that `e` is a positive integer strictly below the group
    /// order, per §4.2 step 2, then computes `K = e^y mod p`.
    pub fn compute_k(&self, e: &BigUint, y: &BigUint) -> Result<SharedSecret, InvalidPeerValue> {
        let p = self.prime();
        if e.is_zero_or_one_guard() || e >= &p {
            return Err(InvalidPeerValue);
        }
        let k = e.modpow(y, &p);
        Ok(secrecy::Secret::new(SharedSecretInner(k.to_bytes_be())))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("peer's DH public value is not a valid group element")]
pub struct InvalidPeerValue;

trait ZeroOneGuard {
    fn is_zero_or_one_guard(&self) -> bool;
}
impl ZeroOneGuard for BigUint {
    fn is_zero_or_one_guard(&self) -> bool {
        self.to_u32_digits().is_empty() || self == &BigUint::from(1u32)
    }
}
