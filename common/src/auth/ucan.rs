// common/src/auth/ucan.rs
//! UCAN invocation tokens.
//!
//! A token is `base64url(header).base64url(payload).base64url(signature)`.
//! Delegation chains end at a wallet: the root token is issued by a
//! `did:pkh:eth` identity and signed with an EIP-191 personal signature over
//! the signing input. Intermediate tokens are issued by Ed25519 `did:key`
//! identities. The verifier returns the root wallet address.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_zebra::{Signature, VerificationKey};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::ethereum::EthereumSigner;
use crate::config::UcanConfig;
use crate::utils::normalize_address;

pub const UCAN_VERSION: &str = "0.10.0";

pub const ALG_EDDSA: &str = "EdDSA";
pub const ALG_EIP191: &str = "EIP191";

pub const DID_KEY_PREFIX: &str = "did:key:z";
pub const DID_PKH_ETH_PREFIX: &str = "did:pkh:eth:";
pub const DID_PKH_EIP155_PREFIX: &str = "did:pkh:eip155:";
pub const ED25519_MAGIC_BYTES: &[u8] = &[0xed, 0x01];

/// Default namespace for app-scoped resources.
pub const APP_RESOURCE_PREFIX: &str = "app:";
/// App id of an `app:*` capability; covers every app.
pub const ANY_APP: &str = "*";

const MAX_CHAIN_DEPTH: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UcanError {
    #[error("ucan authentication is disabled")]
    Disabled,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("audience mismatch: expected {expected}, found {found}")]
    AudienceMismatch { expected: String, found: String },

    #[error("missing capability {action} on {resource}")]
    MissingCapability { resource: String, action: String },

    #[error("capability not delegated by proof: {0}")]
    NotDelegated(String),

    #[error("delegation chain does not end at a wallet")]
    UnrootedChain,

    #[error("delegation chain too deep")]
    ChainTooDeep,
}

/// A single `{resource, action}` grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability {
    pub resource: String,
    pub action: String,
}

impl Capability {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// True if holding `self` implies holding `wanted`.
    pub fn covers(&self, wanted: &Capability) -> bool {
        pattern_covers(&self.resource, &wanted.resource)
            && pattern_covers(&self.action, &wanted.action)
    }
}

/// `*` matches anything; a trailing `*` matches by prefix.
fn pattern_covers(granted: &str, wanted: &str) -> bool {
    if granted == wanted || granted == "*" {
        return true;
    }
    match granted.strip_suffix('*') {
        Some(prefix) => wanted.starts_with(prefix),
        None => false,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct UcanHeader {
    alg: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Attenuation {
    with: String,
    can: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UcanPayload {
    #[serde(default)]
    ucv: Option<String>,
    iss: String,
    aud: String,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    cap: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
    #[serde(default)]
    att: Vec<Attenuation>,
    #[serde(default)]
    prf: Vec<String>,
}

/// A decoded, not yet verified, UCAN.
#[derive(Debug, Clone)]
pub struct Ucan {
    header: UcanHeader,
    payload: UcanPayload,
    signed_data: String,
    signature: Vec<u8>,
}

impl Ucan {
    pub fn parse(token: &str) -> Result<Self, UcanError> {
        let mut parts = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(UcanError::Malformed("expected three segments".into()));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| UcanError::Malformed(format!("signature: {}", e)))?;

        Ok(Self {
            header: decode_segment(header)?,
            payload: decode_segment(payload)?,
            signed_data: format!("{}.{}", header, payload),
            signature,
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.header.alg
    }

    pub fn issuer(&self) -> &str {
        &self.payload.iss
    }

    pub fn audience(&self) -> &str {
        &self.payload.aud
    }

    pub fn version(&self) -> Option<&str> {
        self.payload.ucv.as_deref()
    }

    pub fn proofs(&self) -> &[String] {
        &self.payload.prf
    }

    /// Flattened `cap` map plus legacy `att` entries.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self
            .payload
            .cap
            .iter()
            .flat_map(|(resource, abilities)| {
                abilities
                    .keys()
                    .map(move |action| Capability::new(resource.clone(), action.clone()))
            })
            .collect();
        caps.extend(
            self.payload
                .att
                .iter()
                .map(|a| Capability::new(a.with.clone(), a.can.clone())),
        );
        caps
    }

    pub fn grants(&self, wanted: &Capability) -> bool {
        self.capabilities().iter().any(|cap| cap.covers(wanted))
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.payload.exp, Some(exp) if exp < now)
    }

    pub fn is_too_early(&self, now: u64) -> bool {
        matches!(self.payload.nbf, Some(nbf) if nbf > now)
    }

    /// True if this token's validity window contains `other`'s.
    pub fn lifetime_encompasses(&self, other: &Ucan) -> bool {
        let begins_before = match (self.payload.nbf, other.payload.nbf) {
            (Some(nbf), Some(other_nbf)) => nbf <= other_nbf,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let ends_after = match (self.payload.exp, other.payload.exp) {
            (Some(exp), Some(other_exp)) => exp >= other_exp,
            (Some(_), None) => false,
            (None, _) => true,
        };
        begins_before && ends_after
    }

    /// Wallet address when the issuer is a `did:pkh` Ethereum identity.
    pub fn issuer_wallet(&self) -> Option<String> {
        wallet_from_did(&self.payload.iss)
    }

    fn validate_time(&self, now: u64) -> Result<(), UcanError> {
        if self.is_expired(now) {
            return Err(UcanError::Expired);
        }
        if self.is_too_early(now) {
            return Err(UcanError::NotYetValid);
        }
        Ok(())
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, UcanError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| UcanError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| UcanError::Malformed(e.to_string()))
}

fn wallet_from_did(did: &str) -> Option<String> {
    let address = if let Some(rest) = did.strip_prefix(DID_PKH_ETH_PREFIX) {
        rest
    } else if let Some(rest) = did.strip_prefix(DID_PKH_EIP155_PREFIX) {
        // did:pkh:eip155:<chain-id>:<address>
        rest.split_once(':').map(|(_, address)| address)?
    } else {
        return None;
    };

    EthereumSigner::new()
        .is_valid_address(address)
        .then(|| normalize_address(address))
}

/// Cheap structural check: does this bearer token look like a UCAN?
///
/// Decodes the header and payload segments only; no signature work.
pub fn is_ucan_token(token: &str) -> bool {
    let mut parts = token.trim().split('.');
    let (Some(header), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default)]
        typ: Option<String>,
        #[serde(default)]
        ucv: Option<String>,
    }

    let Ok(header) = decode_segment::<Probe>(header) else {
        return false;
    };
    if header.typ.is_some_and(|t| t.eq_ignore_ascii_case("ucan")) || header.ucv.is_some() {
        return true;
    }
    decode_segment::<Probe>(payload).is_ok_and(|p| p.ucv.is_some())
}

/// Capabilities claimed by a token, without verifying it.
pub fn parse_capabilities(token: &str) -> Result<Vec<Capability>, UcanError> {
    Ucan::parse(token).map(|ucan| ucan.capabilities())
}

/// Groups capabilities under `prefix` into `app id -> sorted actions`.
pub fn extract_app_caps(caps: &[Capability], prefix: &str) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, BTreeSet<String>> = HashMap::new();
    for cap in caps {
        let Some(rest) = cap.resource.strip_prefix(prefix) else {
            continue;
        };
        let app_id = rest.split('/').next().unwrap_or_default().trim();
        if app_id.is_empty() || cap.action.is_empty() {
            continue;
        }
        grouped
            .entry(app_id.to_string())
            .or_default()
            .insert(cap.action.clone());
    }
    grouped
        .into_iter()
        .map(|(app, actions)| (app, actions.into_iter().collect()))
        .collect()
}

/// Per-request app capabilities derived from a UCAN bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UcanContext {
    pub app_caps: HashMap<String, Vec<String>>,
}

impl UcanContext {
    pub fn new(app_caps: HashMap<String, Vec<String>>) -> Self {
        Self { app_caps }
    }

    /// True if `app_id`, or the `*` app wildcard, grants `action`.
    pub fn allows(&self, app_id: &str, action: &str) -> bool {
        [app_id, ANY_APP]
            .iter()
            .filter_map(|app| self.app_caps.get(*app))
            .flatten()
            .any(|granted| pattern_covers(granted, action))
    }
}

/// Verifies UCAN invocations against the configured trust parameters.
#[derive(Debug, Clone)]
pub struct UcanVerifier {
    enabled: bool,
    audience: String,
    required: Option<Capability>,
    signer: EthereumSigner,
}

impl UcanVerifier {
    pub fn new(config: &UcanConfig) -> Self {
        let required = match (config.required_resource.trim(), config.required_action.trim()) {
            ("", _) | (_, "") => None,
            (resource, action) => Some(Capability::new(resource, action)),
        };
        Self {
            enabled: config.enabled,
            audience: config.audience.clone(),
            required,
            signer: EthereumSigner::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&UcanConfig::default())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Verifies an invocation and returns the controlling wallet address.
    pub fn verify_invocation(&self, token: &str) -> Result<String, UcanError> {
        self.verify_invocation_at(token, unix_now())
    }

    pub fn verify_invocation_at(&self, token: &str, now: u64) -> Result<String, UcanError> {
        if !self.enabled {
            return Err(UcanError::Disabled);
        }

        let invocation = Ucan::parse(token)?;
        if invocation.audience() != self.audience {
            return Err(UcanError::AudienceMismatch {
                expected: self.audience.clone(),
                found: invocation.audience().to_string(),
            });
        }

        if let Some(required) = &self.required {
            if !invocation.grants(required) {
                return Err(UcanError::MissingCapability {
                    resource: required.resource.clone(),
                    action: required.action.clone(),
                });
            }
        }

        self.verify_chain(&invocation, now, 0)
    }

    fn verify_chain(&self, ucan: &Ucan, now: u64, depth: usize) -> Result<String, UcanError> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(UcanError::ChainTooDeep);
        }

        ucan.validate_time(now)?;
        self.check_signature(ucan)?;

        if let Some(address) = ucan.issuer_wallet() {
            return Ok(address);
        }

        let mut last_error = UcanError::UnrootedChain;
        for encoded in ucan.proofs() {
            match self.verify_proof(ucan, encoded, now, depth) {
                Ok(address) => return Ok(address),
                Err(err) => {
                    tracing::debug!(error = %err, depth, "ucan proof rejected");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn verify_proof(
        &self,
        child: &Ucan,
        encoded: &str,
        now: u64,
        depth: usize,
    ) -> Result<String, UcanError> {
        let proof = Ucan::parse(encoded)?;
        if proof.audience() != child.issuer() {
            return Err(UcanError::AudienceMismatch {
                expected: child.issuer().to_string(),
                found: proof.audience().to_string(),
            });
        }
        if !proof.lifetime_encompasses(child) {
            return Err(UcanError::NotDelegated("proof lifetime is shorter".into()));
        }
        if let Some(missing) = child.capabilities().iter().find(|cap| !proof.grants(cap)) {
            return Err(UcanError::NotDelegated(format!(
                "{} {}",
                missing.action, missing.resource
            )));
        }
        self.verify_chain(&proof, now, depth + 1)
    }

    fn check_signature(&self, ucan: &Ucan) -> Result<(), UcanError> {
        match ucan.algorithm() {
            ALG_EDDSA => {
                let key = ed25519_key_from_did(ucan.issuer())?;
                let signature = Signature::try_from(ucan.signature.as_slice())
                    .map_err(|_| UcanError::InvalidSignature)?;
                key.verify(&signature, ucan.signed_data.as_bytes())
                    .map_err(|_| UcanError::InvalidSignature)
            }
            ALG_EIP191 => {
                let expected = ucan
                    .issuer_wallet()
                    .ok_or_else(|| UcanError::InvalidIssuer(ucan.issuer().to_string()))?;
                let recovered = self
                    .signer
                    .recover_address_from_bytes(ucan.signed_data.as_bytes(), &ucan.signature)
                    .map_err(|_| UcanError::InvalidSignature)?;
                if recovered != expected {
                    return Err(UcanError::InvalidSignature);
                }
                Ok(())
            }
            other => Err(UcanError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

fn ed25519_key_from_did(did: &str) -> Result<VerificationKey, UcanError> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| UcanError::InvalidIssuer(did.to_string()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| UcanError::InvalidIssuer(did.to_string()))?;
    if bytes.len() != 34 || &bytes[..2] != ED25519_MAGIC_BYTES {
        return Err(UcanError::InvalidIssuer(did.to_string()));
    }
    VerificationKey::try_from(&bytes[2..]).map_err(|_| UcanError::InvalidIssuer(did.to_string()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
