// common/src/auth/ethereum.rs
//! EIP-191 personal-message signature checks.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::SignatureError;
use crate::utils::normalize_address;

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Stateless checker for Ethereum addresses and wallet signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthereumSigner;

impl EthereumSigner {
    pub fn new() -> Self {
        Self
    }

    /// Syntactic check: 40 hex digits, optional `0x`, any letter case.
    pub fn is_valid_address(&self, address: &str) -> bool {
        let hex_part = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .unwrap_or(address);
        hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Verifies that `signature_hex` is `expected_address`'s personal signature of `message`.
    pub fn verify_signature(
        &self,
        message: &str,
        signature_hex: &str,
        expected_address: &str,
    ) -> Result<(), SignatureError> {
        let recovered = self.recover_address(message, signature_hex)?;
        let expected = normalize_address(expected_address);
        if recovered != expected {
            return Err(SignatureError::AddressMismatch {
                expected,
                recovered,
            });
        }
        Ok(())
    }

    /// Recovers the lower-case signer address of a personal signature.
    pub fn recover_address(
        &self,
        message: &str,
        signature_hex: &str,
    ) -> Result<String, SignatureError> {
        let trimmed = signature_hex.trim();
        let raw = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(raw).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
        self.recover_address_from_bytes(message.as_bytes(), &bytes)
    }

    /// Same as [`recover_address`](Self::recover_address) for an already-decoded signature.
    pub fn recover_address_from_bytes(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> Result<String, SignatureError> {
        if signature.len() != 65 {
            return Err(SignatureError::InvalidLength(signature.len()));
        }

        // Wallets emit v as 27/28.
        let mut v = signature[64];
        if v >= 27 {
            v -= 27;
        }
        let mut recovery_id =
            RecoveryId::from_byte(v).ok_or(SignatureError::InvalidRecoveryId(signature[64]))?;
        if recovery_id.is_x_reduced() {
            return Err(SignatureError::InvalidRecoveryId(signature[64]));
        }

        let mut sig =
            Signature::from_slice(&signature[..64]).map_err(|_| SignatureError::RecoveryFailed)?;
        // k256 only accepts low-S; flipping S flips the parity of R's y.
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), false);
        }

        let digest = personal_message_hash(message);
        let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
            .map_err(|_| SignatureError::RecoveryFailed)?;

        Ok(address_from_verifying_key(&key))
    }
}

/// Keccak-256 of `"\x19Ethereum Signed Message:\n" + len(message) + message`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Lower-case `0x` address of a secp256k1 public key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}
