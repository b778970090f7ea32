//! WireGuard key material
//!
//! Generates X25519 keypairs natively (x25519-dalek) in the base64
//! format the `wg` tooling uses. No external `wg genkey`/`wg pubkey`
//! invocation is required, but keys are interchangeable with ones
//! produced that way.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use meshgate_core::error::ValidationError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// A WireGuard keypair, both halves base64-encoded
#[derive(Debug, Clone)]
pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a fresh keypair
pub fn generate_keypair() -> Keypair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    Keypair {
        private_key: STANDARD.encode(secret.to_bytes()),
        public_key: STANDARD.encode(public.as_bytes()),
    }
}

/// Derive the public key for a base64-encoded private key
///
/// Equivalent of piping a private key through `wg pubkey`.
pub fn derive_public_key(private_key: &str) -> Result<String, ValidationError> {
    let bytes = decode_key(private_key)?;
    let secret = StaticSecret::from(bytes);
    let public = PublicKey::from(&secret);
    Ok(STANDARD.encode(public.as_bytes()))
}

/// Check that a key is 32 bytes of standard base64
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    decode_key(key).map(|_| ())
}

fn decode_key(key: &str) -> Result<[u8; 32], ValidationError> {
    let bytes = STANDARD
        .decode(key)
        .map_err(|_| ValidationError::MalformedKey(key.to_string()))?;

    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| ValidationError::MalformedKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_44_char_base64() {
        let keypair = generate_keypair();
        assert_eq!(keypair.private_key.len(), 44);
        assert_eq!(keypair.public_key.len(), 44);

        assert_eq!(STANDARD.decode(&keypair.private_key).unwrap().len(), 32);
        assert_eq!(STANDARD.decode(&keypair.public_key).unwrap().len(), 32);
    }

    #[test]
    fn test_derive_matches_generated_public_key() {
        let keypair = generate_keypair();
        let derived = derive_public_key(&keypair.private_key).unwrap();
        assert_eq!(derived, keypair.public_key);
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_keypair();
        let b = generate_keypair();
        assert_ne!(a.private_key, b.private_key);
    }

    #[test]
    fn test_malformed_keys_rejected() {
        assert!(validate_key("not base64 at all!").is_err());
        // Valid base64, wrong length
        assert!(validate_key(&STANDARD.encode([0u8; 16])).is_err());
        assert!(validate_key(&STANDARD.encode([0u8; 32])).is_ok());
    }
}
