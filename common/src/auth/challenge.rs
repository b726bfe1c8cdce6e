// common/src/auth/challenge.rs
//! One-time login challenges keyed by wallet address.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::utils::{generate_nonce, normalize_address};

/// Lifetime of a login challenge.
pub const CHALLENGE_TTL_SECS: i64 = 5 * 60;

/// How often abandoned challenges are reaped.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A message a wallet must sign to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub address: String,
    pub nonce: String,
    pub message: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    fn new(address: String, ttl: chrono::Duration) -> Self {
        let nonce = generate_nonce();
        let issued_at = Utc::now();
        let message = format!(
            "Sign this message to log in to WalletDAV\n\nAddress: {}\nNonce: {}\nTimestamp: {}",
            address,
            nonce,
            issued_at.timestamp()
        );
        Self {
            address,
            nonce,
            message,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent store holding at most one live challenge per address.
///
/// Expiry is checked on every read; the background sweep only reclaims memory.
pub struct ChallengeStore {
    entries: Arc<DashMap<String, Challenge>>,
    cancel_token: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    /// Creates the store and, inside a Tokio runtime, starts the sweep task.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let store = Self {
            entries: Arc::new(DashMap::new()),
            cancel_token: CancellationToken::new(),
            sweep_handle: Mutex::new(None),
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let entries = Arc::clone(&store.entries);
                let token = store.cancel_token.clone();
                let handle = runtime.spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    // The first tick completes immediately.
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            _ = token.cancelled() => {
                                tracing::debug!("challenge sweep task shutting down");
                                break;
                            }
                            _ = ticker.tick() => {
                                let removed = sweep(&entries);
                                if removed > 0 {
                                    tracing::debug!(removed, "cleaned up expired challenges");
                                }
                            }
                        }
                    }
                });
                *store
                    .sweep_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(_) => {
                tracing::debug!("no tokio runtime; challenge sweep disabled");
            }
        }

        store
    }

    /// Issues a fresh challenge, replacing any unconsumed one for the address.
    pub fn create(&self, address: &str, ttl: chrono::Duration) -> Challenge {
        let address = normalize_address(address);
        let challenge = Challenge::new(address.clone(), ttl);
        self.entries.insert(address, challenge.clone());
        challenge
    }

    /// Live challenge for the address, without consuming it.
    pub fn get(&self, address: &str) -> Option<Challenge> {
        let address = normalize_address(address);
        let entry = self.entries.get(&address)?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Removes whatever challenge is stored for the address.
    pub fn delete(&self, address: &str) -> bool {
        self.entries.remove(&normalize_address(address)).is_some()
    }

    /// Removes `challenge` only if it is still the stored one.
    ///
    /// Exactly one caller can consume a given challenge; losers get `false`.
    pub fn consume(&self, challenge: &Challenge) -> bool {
        self.entries
            .remove_if(&challenge.address, |_, stored| {
                stored.nonce == challenge.nonce && !stored.is_expired(Utc::now())
            })
            .is_some()
    }

    /// Drops every expired challenge and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stops the sweep task. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn sweep_running(&self) -> bool {
        self.sweep_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for ChallengeStore {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn sweep(entries: &DashMap<String, Challenge>) -> usize {
    let now = Utc::now();
    let before = entries.len();
    entries.retain(|_, challenge| !challenge.is_expired(now));
    before.saturating_sub(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

    fn ttl() -> chrono::Duration {
        chrono::Duration::seconds(CHALLENGE_TTL_SECS)
    }

    #[test]
    fn test_create_embeds_normalized_address() {
        let store = ChallengeStore::new();
        let challenge = store.create(ADDRESS, ttl());

        assert_eq!(challenge.address, ADDRESS.to_lowercase());
        assert!(challenge.message.contains(&ADDRESS.to_lowercase()));
        assert!(challenge.message.contains(&challenge.nonce));
        assert_eq!(challenge.nonce.len(), 32);

        let stored = store.get(&ADDRESS.to_uppercase().replace("0X", "0x")).unwrap();
        assert_eq!(stored, challenge);
    }

    #[test]
    fn test_create_replaces_previous() {
        let store = ChallengeStore::new();
        let first = store.create(ADDRESS, ttl());
        let second = store.create(ADDRESS, ttl());

        assert_ne!(first.nonce, second.nonce);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(ADDRESS).unwrap().nonce, second.nonce);
        assert!(!store.consume(&first));
        assert!(store.consume(&second));
    }

    #[test]
    fn test_get_does_not_consume() {
        let store = ChallengeStore::new();
        store.create(ADDRESS, ttl());
        assert!(store.get(ADDRESS).is_some());
        assert!(store.get(ADDRESS).is_some());
        assert!(store.delete(ADDRESS));
        assert!(store.get(ADDRESS).is_none());
        assert!(!store.delete(ADDRESS));
    }

    #[test]
    fn test_expired_challenge_is_invisible_before_sweep() {
        let store = ChallengeStore::new();
        let challenge = store.create(ADDRESS, chrono::Duration::seconds(-1));

        assert!(store.get(ADDRESS).is_none());
        assert!(!store.consume(&challenge));
        assert_eq!(store.len(), 1);
        assert_eq!(store.sweep_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_consume_only_once() {
        let store = Arc::new(ChallengeStore::new());
        let challenge = store.create(ADDRESS, ttl());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let challenge = challenge.clone();
                std::thread::spawn(move || store.consume(&challenge))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_no_runtime_means_no_sweep_task() {
        let store = ChallengeStore::new();
        assert!(!store.sweep_running());
    }

    #[tokio::test]
    async fn test_sweep_task_reaps_expired() {
        let store = ChallengeStore::with_sweep_interval(Duration::from_millis(10));
        assert!(store.sweep_running());

        store.create(ADDRESS, chrono::Duration::seconds(-1));
        store.create("0x0000000000000000000000000000000000000001", ttl());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.len(), 1);
        assert!(store.get("0x0000000000000000000000000000000000000001").is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweep_task() {
        let store = ChallengeStore::with_sweep_interval(Duration::from_millis(10));
        store.shutdown();
        store.shutdown();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.sweep_running());
        assert!(store.cancel_token().is_cancelled());
    }
}
