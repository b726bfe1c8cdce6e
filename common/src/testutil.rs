// common/src/testutil.rs
//! Wallets, agents and token builders for tests.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_zebra::{SigningKey as Ed25519PrivateKey, VerificationKey as Ed25519PublicKey};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};

use crate::auth::ethereum::{address_from_verifying_key, personal_message_hash};
use crate::auth::ucan::{ALG_EDDSA, ALG_EIP191, ED25519_MAGIC_BYTES, UCAN_VERSION};

/// A secp256k1 key standing in for a browser wallet.
pub struct TestWallet {
    pub key: SigningKey,
}

impl TestWallet {
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_hex(secret: &str) -> Self {
        let bytes = hex::decode(secret).expect("hex private key");
        Self {
            key: SigningKey::from_slice(&bytes).expect("valid secp256k1 key"),
        }
    }

    /// Lower-case `0x` address.
    pub fn address(&self) -> String {
        address_from_verifying_key(self.key.verifying_key())
    }

    pub fn did(&self) -> String {
        format!("did:pkh:eth:{}", self.address())
    }

    /// `0x`-prefixed personal signature with `v` in {27, 28}.
    pub fn sign(&self, message: &str) -> String {
        sign_personal_message(&self.key, message)
    }
}

/// Raw 65-byte personal signature over `message`.
pub fn personal_signature(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let digest = personal_message_hash(message);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .expect("signing succeeds");
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    bytes
}

pub fn sign_personal_message(key: &SigningKey, message: &str) -> String {
    format!("0x{}", hex::encode(personal_signature(key, message.as_bytes())))
}

/// An Ed25519 `did:key` identity, the usual UCAN delegate.
pub struct TestAgent {
    private_key: Ed25519PrivateKey,
}

impl TestAgent {
    pub fn random() -> Self {
        Self {
            private_key: Ed25519PrivateKey::new(rand::thread_rng()),
        }
    }

    pub fn did(&self) -> String {
        let public_key = Ed25519PublicKey::from(&self.private_key);
        let bytes = [ED25519_MAGIC_BYTES, public_key.as_ref()].concat();
        format!("did:key:z{}", bs58::encode(bytes).into_string())
    }

    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let bytes: [u8; 64] = self.private_key.sign(payload).into();
        bytes.to_vec()
    }
}

/// Assembles and signs UCAN tokens.
pub struct UcanBuilder {
    issuer: String,
    audience: String,
    capabilities: BTreeMap<String, BTreeMap<String, Value>>,
    proofs: Vec<String>,
    expires_at: Option<u64>,
    not_before: Option<u64>,
}

impl UcanBuilder {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            capabilities: BTreeMap::new(),
            proofs: Vec::new(),
            expires_at: None,
            not_before: None,
        }
    }

    pub fn capability(mut self, resource: &str, action: &str) -> Self {
        self.capabilities
            .entry(resource.to_string())
            .or_default()
            .insert(action.to_string(), json!([{}]));
        self
    }

    pub fn proof(mut self, token: impl Into<String>) -> Self {
        self.proofs.push(token.into());
        self
    }

    pub fn expires_at(mut self, exp: u64) -> Self {
        self.expires_at = Some(exp);
        self
    }

    pub fn not_before(mut self, nbf: u64) -> Self {
        self.not_before = Some(nbf);
        self
    }

    pub fn sign_with_wallet(self, wallet: &TestWallet) -> String {
        let signing_input = self.signing_input(ALG_EIP191);
        let signature = personal_signature(&wallet.key, signing_input.as_bytes());
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
    }

    pub fn sign_with_agent(self, agent: &TestAgent) -> String {
        let signing_input = self.signing_input(ALG_EDDSA);
        let signature = agent.sign(signing_input.as_bytes());
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
    }

    fn signing_input(&self, alg: &str) -> String {
        let header = json!({ "alg": alg, "typ": "JWT" });
        let mut payload = json!({
            "ucv": UCAN_VERSION,
            "iss": self.issuer,
            "aud": self.audience,
            "cap": self.capabilities,
            "prf": self.proofs,
        });
        if let Some(exp) = self.expires_at {
            payload["exp"] = json!(exp);
        }
        if let Some(nbf) = self.not_before {
            payload["nbf"] = json!(nbf);
        }
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }
}
