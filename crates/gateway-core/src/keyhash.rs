//! API key generation and hashing.
//!
//! Keys are minted as random opaque tokens and never stored in plaintext.
//! The persisted `key_hash` is an HMAC-SHA-256 over the plaintext, keyed by
//! a process-wide secret — deterministic for lookup, but not invertible.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const KEY_PREFIX: &str = "sk-gw-";
const TOKEN_BYTES: usize = 32;

/// Generates a random opaque API key in plaintext. The caller is responsible
/// for hashing it via [`hash_key`] before persisting and for returning the
/// plaintext to the client exactly once.
pub fn generate_plaintext_key() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{KEY_PREFIX}{}", hex::encode(buf))
}

/// Salted keyed-hash of an API key's plaintext, hex-encoded. Deterministic
/// in its input; does not leak the plaintext by inversion.
pub fn hash_key(plaintext: &str, salt: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts any key length");
    mac.update(plaintext.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash_key("sk-gw-abc", "salt");
        let b = hash_key("sk-gw-abc", "salt");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_hash_differently() {
        let a = hash_key("sk-gw-abc", "salt");
        let b = hash_key("sk-gw-xyz", "salt");
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_salts_hash_differently() {
        let a = hash_key("sk-gw-abc", "salt-one");
        let b = hash_key("sk-gw-abc", "salt-two");
        assert_ne!(a, b);
    }

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let a = generate_plaintext_key();
        let b = generate_plaintext_key();
        assert_ne!(a, b);
        assert!(a.starts_with(KEY_PREFIX));
        assert_eq!(a.len(), KEY_PREFIX.len() + TOKEN_BYTES * 2);
    }
}
