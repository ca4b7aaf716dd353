//! Agent secret tokens. Only the SHA-256 digest is ever stored.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 64;

/// Fresh 64-byte random token, hex encoded
pub fn generate_secret_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex SHA-256 digest of a token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time check of a presented token against a stored digest
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    let presented = hash_token(token);
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate_secret_token();
        let b = generate_secret_token();

        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_token() {
        let token = generate_secret_token();
        let stored = hash_token(&token);

        assert_eq!(stored.len(), 64);
        assert!(verify_token(&token, &stored));
        assert!(!verify_token("not-the-token", &stored));
        assert!(!verify_token(&token, ""));
    }
}
