// common/src/utils.rs
use rand::{rngs::OsRng, RngCore};
use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

/// Setup tracing for consistent logging across the server.
///
/// Unknown level names fall back to `info`.
pub fn setup_tracing(level: &str) -> Result<(), SetGlobalDefaultError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// Canonical form of a wallet address: trimmed, lower-cased, `0x`-prefixed.
///
/// Every lookup and write keyed by wallet goes through this, so one wallet
/// never maps to two identities.
pub fn normalize_address(address: &str) -> String {
    let lowered = address.trim().to_lowercase();
    if lowered.is_empty() || lowered.starts_with("0x") {
        lowered
    } else {
        format!("0x{}", lowered)
    }
}

/// Random hex string built from `bytes` bytes of OS entropy.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Fresh challenge nonce (16 random bytes, hex-encoded).
pub fn generate_nonce() -> String {
    random_hex(16)
}

/// Fresh process-lifetime signing secret (32 random bytes, hex-encoded).
pub fn generate_secret() -> String {
    random_hex(32)
}
