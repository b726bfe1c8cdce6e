// common/src/error.rs
//! Error types for wallet authentication.
//!
//! Callers match on [`AuthError`] to decide between a 400-class input rejection,
//! a 401-class credential rejection, a "no such identity" outcome and an
//! internal failure. The finer-grained [`SignatureError`] and
//! [`UcanError`](crate::auth::ucan::UcanError) are kept for logging.

use thiserror::Error;

use crate::auth::ucan::UcanError;
use crate::store::UserStoreError;

/// Authentication and identity-resolution errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Address is not a 20-byte hex Ethereum address.
    #[error("invalid ethereum address")]
    InvalidAddress,

    /// Signature was empty.
    #[error("signature is required")]
    EmptySignature,

    /// Bearer token is empty, malformed, badly signed, expired or of the wrong kind.
    #[error("invalid token")]
    InvalidToken,

    /// No live challenge exists for the address.
    #[error("challenge expired or not found")]
    ChallengeExpired,

    /// Signature does not prove control of the address.
    #[error("invalid signature")]
    InvalidSignature,

    /// The UCAN token failed verification.
    #[error("ucan verification failed: {0}")]
    Ucan(#[from] UcanError),

    /// The token was valid but no identity is bound to the wallet.
    #[error("user not found")]
    UserNotFound,

    /// Auto-provisioning gave up.
    #[error("failed to create user: {0}")]
    ProvisioningFailed(String),

    /// The user store failed.
    #[error("user store error: {0}")]
    Store(UserStoreError),

    /// Token signing failed.
    #[error("failed to generate token: {0}")]
    TokenGeneration(String),
}

impl AuthError {
    /// True when the failure means "present a different credential".
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::EmptySignature
                | AuthError::InvalidToken
                | AuthError::ChallengeExpired
                | AuthError::InvalidSignature
                | AuthError::Ucan(_)
        )
    }
}

impl From<UserStoreError> for AuthError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::NotFound => AuthError::UserNotFound,
            other => AuthError::Store(other),
        }
    }
}

/// Failures while checking an EIP-191 personal signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature encoding: {0}")]
    InvalidHex(String),

    #[error("invalid signature length: expected 65 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("failed to recover public key")]
    RecoveryFailed,

    #[error("address mismatch: expected {expected}, got {recovered}")]
    AddressMismatch { expected: String, recovered: String },
}
