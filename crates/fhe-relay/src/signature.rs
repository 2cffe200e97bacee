//! Typed-data digests and recoverable secp256k1 signatures.
//!
//! Re-encryption requests must prove that the submitting account signed the
//! public key the result will be encrypted under. The proof is a 65-byte
//! recoverable signature over a domain-separated digest of that key.

use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey, Signature};
use sha2::{Digest, Sha256};

use crate::types::Address;
use crate::RelayError;

const REENCRYPT_DOMAIN: &[u8] = b"FHE_RELAY_REENCRYPT_V1";

/// Wire length of a recoverable signature: 64 signature bytes plus one
/// recovery byte.
pub const SIGNATURE_LEN: usize = 65;

/// Digest binding the re-encryption domain separator to the public key.
pub fn reencrypt_digest(public_key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(REENCRYPT_DOMAIN);
    hasher.update(public_key);
    hasher.finalize().into()
}

/// Derive the account address for a secp256k1 public key: the trailing 20
/// bytes of the SHA-256 digest of the uncompressed point.
pub fn address_of(public_key: &PublicKey) -> Address {
    let serialized = public_key.serialize();
    let digest: [u8; 32] = Sha256::digest(&serialized[1..]).into();
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Address(address)
}

/// Address of the account holding `secret`.
pub fn address_of_secret(secret: &SecretKey) -> Address {
    address_of(&PublicKey::from_secret_key(secret))
}

/// Recover the signing address from a 65-byte recoverable signature over
/// `digest`. Any parse or recovery failure is a signature mismatch.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Result<Address, RelayError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(RelayError::SignatureMismatch);
    }
    let message = Message::parse(digest);
    let parsed = Signature::parse_standard_slice(&signature[..64])
        .map_err(|_| RelayError::SignatureMismatch)?;
    let recovery = RecoveryId::parse(signature[64]).map_err(|_| RelayError::SignatureMismatch)?;
    let public = libsecp256k1::recover(&message, &parsed, &recovery)
        .map_err(|_| RelayError::SignatureMismatch)?;
    Ok(address_of(&public))
}

/// Sign a digest, producing the 65-byte recoverable wire format that
/// `recover_signer` accepts.
pub fn sign_digest(digest: &[u8; 32], secret: &SecretKey) -> [u8; 65] {
    let (signature, recovery) = libsecp256k1::sign(&Message::parse(digest), secret);
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&signature.serialize());
    out[64] = recovery.serialize();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret(fill: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[0] = fill;
        bytes[31] = 1;
        SecretKey::parse(&bytes).unwrap()
    }

    #[test]
    fn test_sign_and_recover() {
        let secret = test_secret(42);
        let digest = reencrypt_digest(b"client public key bytes");

        let signature = sign_digest(&digest, &secret);
        let signer = recover_signer(&digest, &signature).unwrap();
        assert_eq!(signer, address_of_secret(&secret));
    }

    #[test]
    fn test_recover_rejects_wrong_digest() {
        let secret = test_secret(42);
        let signature = sign_digest(&reencrypt_digest(b"key a"), &secret);

        let other = reencrypt_digest(b"key b");
        let signer = recover_signer(&other, &signature).unwrap();
        // Recovery over a different digest yields some key, but not ours.
        assert_ne!(signer, address_of_secret(&secret));
    }

    #[test]
    fn test_recover_rejects_malformed_signature() {
        let digest = reencrypt_digest(b"key");
        assert!(matches!(
            recover_signer(&digest, &[0u8; 10]),
            Err(RelayError::SignatureMismatch)
        ));
        // A recovery byte out of range is also a mismatch.
        let secret = test_secret(9);
        let mut signature = sign_digest(&digest, &secret);
        signature[64] = 29;
        assert!(matches!(
            recover_signer(&digest, &signature),
            Err(RelayError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_distinct_keys_distinct_addresses() {
        assert_ne!(
            address_of_secret(&test_secret(1)),
            address_of_secret(&test_secret(2))
        );
    }
}
