/// Opaque Secret Generation and Hashing
///
/// Opaque secrets back every "mail a link, redeem it once" flow:
/// - 32 bytes from a cryptographically secure RNG (256 bits of entropy)
/// - URL-safe base64 without padding, so the secret drops into a link as-is
/// - Hashed with SHA-256 before storage (never store plaintext)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256};

pub const SECRET_BYTES: usize = 32;

/// Generate a new opaque secret
///
/// The plaintext is handed to the caller once; the server keeps only
/// `hash_secret(&secret)`.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 of the secret's UTF-8 bytes
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();

        // 32 bytes → 43 base64 characters without padding
        assert_eq!(secret.len(), 43);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(URL_SAFE_NO_PAD.decode(&secret).unwrap().len(), SECRET_BYTES);
    }

    #[test]
    fn test_secret_hashing() {
        let secret = generate_secret();
        let hash1 = hash_secret(&secret);
        let hash2 = hash_secret(&secret);

        assert_eq!(hash1, hash2);
        assert_ne!(secret, hash1);
        assert_eq!(hash1.len(), 64);
        assert!(hash1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_different_secrets_different_hashes() {
        let first = generate_secret();
        let second = generate_secret();

        assert_ne!(first, second);
        assert_ne!(hash_secret(&first), hash_secret(&second));
    }
}
