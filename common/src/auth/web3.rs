// common/src/auth/web3.rs
//! Wallet authentication: bearer tokens, the challenge handshake and
//! first-contact provisioning.

use std::sync::Arc;

use chrono::Duration;

use super::challenge::{Challenge, ChallengeStore, CHALLENGE_TTL_SECS};
use super::ethereum::EthereumSigner;
use super::jwt::{ttl_from_secs, JwtManager, Token};
use super::names::NameGenerator;
use super::ucan::{
    extract_app_caps, is_ucan_token, parse_capabilities, UcanContext, UcanVerifier,
    APP_RESOURCE_PREFIX,
};
use crate::config::Web3Config;
use crate::error::AuthError;
use crate::models::user::{Permissions, User, DEFAULT_QUOTA_BYTES};
use crate::store::{UserRepository, UserStoreError};
use crate::utils::normalize_address;

/// Attempts at finding a free username before provisioning gives up.
pub const MAX_USERNAME_ATTEMPTS: usize = 5;

/// The two bearer token shapes, decided once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerCredential<'a> {
    Jwt(&'a str),
    Ucan(&'a str),
}

impl<'a> BearerCredential<'a> {
    /// Structural classification only; neither verifier runs here.
    pub fn classify(token: &'a str) -> Result<Self, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        if is_ucan_token(token) {
            Ok(BearerCredential::Ucan(token))
        } else {
            Ok(BearerCredential::Jwt(token))
        }
    }
}

/// A resolved bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    /// App capabilities; present only for UCAN bearers
    pub ucan: Option<UcanContext>,
}

pub struct Web3Authenticator {
    users: Arc<dyn UserRepository>,
    signer: EthereumSigner,
    challenges: ChallengeStore,
    jwt: JwtManager,
    ucan: UcanVerifier,
    names: NameGenerator,
    refresh_ttl: Duration,
    auto_create_on_ucan: bool,
}

impl Web3Authenticator {
    pub fn new(users: Arc<dyn UserRepository>, config: &Web3Config, ucan: UcanVerifier) -> Self {
        Self {
            users,
            signer: EthereumSigner::new(),
            challenges: ChallengeStore::new(),
            jwt: JwtManager::new(&config.jwt_secret, ttl_from_secs(config.token_expiration_secs)),
            ucan,
            names: NameGenerator::new(),
            refresh_ttl: ttl_from_secs(config.refresh_token_expiration_secs),
            auto_create_on_ucan: config.auto_create_on_ucan,
        }
    }

    /// Replaces the username source, e.g. with a seeded generator.
    pub fn with_name_generator(mut self, names: NameGenerator) -> Self {
        self.names = names;
        self
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    pub fn ucan_enabled(&self) -> bool {
        self.ucan.enabled()
    }

    /// Resolves a bearer token to a user.
    pub async fn authenticate(&self, token: &str) -> Result<Authenticated, AuthError> {
        match BearerCredential::classify(token)? {
            BearerCredential::Jwt(token) => {
                let address = self.jwt.verify(token)?;
                let user = self.ensure_user_by_wallet(&address, false).await?;
                Ok(Authenticated { user, ucan: None })
            }
            BearerCredential::Ucan(token) => {
                if !self.ucan.enabled() {
                    tracing::debug!("ucan bearer presented while ucan is disabled");
                    return Err(AuthError::InvalidToken);
                }
                let address = self.ucan.verify_invocation(token).map_err(|e| {
                    tracing::warn!(error = %e, "ucan verification failed");
                    AuthError::Ucan(e)
                })?;
                let user = self
                    .ensure_user_by_wallet(&address, self.auto_create_on_ucan)
                    .await?;
                let ucan = self.enrich_context(token);
                Ok(Authenticated {
                    user,
                    ucan: Some(ucan),
                })
            }
        }
    }

    /// Looks up the identity bound to `address`, provisioning one when
    /// `auto_create` is set.
    pub async fn ensure_user_by_wallet(
        &self,
        address: &str,
        auto_create: bool,
    ) -> Result<User, AuthError> {
        match self.users.find_by_wallet_address(address).await {
            Ok(user) => Ok(user),
            Err(UserStoreError::NotFound) if auto_create => {
                self.create_user_from_wallet(address).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Provisions a new identity for an unknown wallet.
    ///
    /// Username collisions are resolved by regenerating up to
    /// [`MAX_USERNAME_ATTEMPTS`] times.
    pub async fn create_user_from_wallet(&self, address: &str) -> Result<User, AuthError> {
        let address = normalize_address(address);
        if address.is_empty() || !self.signer.is_valid_address(&address) {
            return Err(AuthError::ProvisioningFailed(
                "invalid wallet address".to_string(),
            ));
        }

        for attempt in 1..=MAX_USERNAME_ATTEMPTS {
            let mut user = User::new(self.names.generate());
            user.permissions = Permissions::ALL;
            user.set_quota(DEFAULT_QUOTA_BYTES);
            user.set_wallet_address(&address);

            match self.users.save(&user).await {
                Ok(()) => {
                    tracing::info!(
                        address = %address,
                        username = %user.username,
                        "provisioned user for wallet"
                    );
                    return Ok(user);
                }
                Err(UserStoreError::DuplicateUsername(name)) => {
                    tracing::debug!(attempt, username = %name, "generated username taken");
                }
                Err(UserStoreError::DuplicateWalletAddress(_)) => {
                    // Someone else provisioned this wallet first.
                    return Ok(self.users.find_by_wallet_address(&address).await?);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(address = %address, "no free username for new wallet user");
        Err(AuthError::ProvisioningFailed(format!(
            "no free username after {} attempts",
            MAX_USERNAME_ATTEMPTS
        )))
    }

    /// App capabilities carried by an already verified UCAN.
    ///
    /// Parse failures yield an empty context.
    pub fn enrich_context(&self, token: &str) -> UcanContext {
        match parse_capabilities(token) {
            Ok(caps) => UcanContext::new(extract_app_caps(&caps, APP_RESOURCE_PREFIX)),
            Err(e) => {
                tracing::debug!(error = %e, "could not read ucan capabilities");
                UcanContext::default()
            }
        }
    }

    /// Issues a login challenge for `address`.
    pub fn create_challenge(&self, address: &str) -> Result<Challenge, AuthError> {
        if !self.signer.is_valid_address(address.trim()) {
            return Err(AuthError::InvalidAddress);
        }
        Ok(self
            .challenges
            .create(address, Duration::seconds(CHALLENGE_TTL_SECS)))
    }

    /// Checks a signed challenge and issues an access token for the wallet.
    ///
    /// The challenge survives a wrong signature and is consumed by the first
    /// correct one.
    pub fn verify_signature(&self, address: &str, signature: &str) -> Result<Token, AuthError> {
        if !self.signer.is_valid_address(address.trim()) {
            return Err(AuthError::InvalidAddress);
        }
        if signature.trim().is_empty() {
            return Err(AuthError::EmptySignature);
        }

        let challenge = self
            .challenges
            .get(address)
            .ok_or(AuthError::ChallengeExpired)?;

        if let Err(e) = self
            .signer
            .verify_signature(&challenge.message, signature, &challenge.address)
        {
            tracing::warn!(address = %challenge.address, error = %e, "signature verification failed");
            return Err(AuthError::InvalidSignature);
        }

        if !self.challenges.consume(&challenge) {
            // A concurrent verification won.
            return Err(AuthError::ChallengeExpired);
        }

        tracing::info!(address = %challenge.address, "wallet signature verified");
        self.jwt.generate(&challenge.address)
    }

    pub fn generate_access_token(&self, address: &str) -> Result<Token, AuthError> {
        self.jwt.generate(&normalize_address(address))
    }

    pub fn generate_refresh_token(&self, address: &str) -> Result<Token, AuthError> {
        self.jwt
            .generate_refresh(&normalize_address(address), self.refresh_ttl)
    }

    /// Returns the wallet address a refresh token was issued to.
    pub fn verify_refresh_token(&self, token: &str) -> Result<String, AuthError> {
        self.jwt.verify_refresh(token)
    }

    /// Stops background work owned by the authenticator.
    pub fn shutdown(&self) {
        self.challenges.shutdown();
    }
}
