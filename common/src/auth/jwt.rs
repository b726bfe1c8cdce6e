// common/src/auth/jwt.rs
//! HMAC-signed access and refresh tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::utils::generate_secret;

/// Longest token lifetime accepted from configuration (100 years).
pub const MAX_TOKEN_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Converts a configured lifetime, clamping it to `MAX_TOKEN_TTL_SECS`.
pub fn ttl_from_secs(secs: i64) -> Duration {
    if secs.abs() > MAX_TOKEN_TTL_SECS {
        tracing::warn!(
            "Token lifetime of {}s is out of range; clamping to {}s",
            secs,
            MAX_TOKEN_TTL_SECS
        );
    }
    Duration::seconds(secs.clamp(-MAX_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS))
}

/// Distinguishes access tokens from refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

// JWT claims; `sub` is the wallet address
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    typ: TokenKind,
}

/// An issued token together with its metadata.
#[derive(Debug, Clone)]
pub struct Token {
    pub token: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub kind: TokenKind,
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
}

impl JwtManager {
    /// Builds a manager around `secret`; an empty secret gets a random one.
    pub fn new(secret: &str, access_ttl: Duration) -> Self {
        let secret = if secret.is_empty() {
            tracing::warn!(
                "No JWT secret configured; using a random one. Tokens will not survive a restart"
            );
            generate_secret()
        } else {
            secret.to_string()
        };

        // Only the HMAC family is accepted.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Issues an access token for `subject`.
    pub fn generate(&self, subject: &str) -> Result<Token, AuthError> {
        self.issue(subject, self.access_ttl, TokenKind::Access)
    }

    /// Issues a refresh token for `subject`.
    pub fn generate_refresh(&self, subject: &str, ttl: Duration) -> Result<Token, AuthError> {
        self.issue(subject, ttl, TokenKind::Refresh)
    }

    /// Returns the subject of a valid access token.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.decode_kind(token, TokenKind::Access)
    }

    /// Returns the subject of a valid refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<String, AuthError> {
        self.decode_kind(token, TokenKind::Refresh)
    }

    fn issue(&self, subject: &str, ttl: Duration, kind: TokenKind) -> Result<Token, AuthError> {
        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::TokenGeneration("token lifetime out of range".into()))?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            typ: kind,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenGeneration(e.to_string()))?;

        Ok(Token {
            token,
            subject: claims.sub,
            issued_at,
            expires_at,
            kind,
        })
    }

    fn decode_kind(&self, token: &str, expected: TokenKind) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!("JWT rejected: {}", e);
            AuthError::InvalidToken
        })?;

        if data.claims.typ != expected {
            tracing::debug!(
                "JWT rejected: expected {:?} token, got {:?}",
                expected,
                data.claims.typ
            );
            return Err(AuthError::InvalidToken);
        }
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(data.claims.sub)
    }
}
