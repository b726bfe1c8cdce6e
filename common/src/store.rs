// common/src/store.rs
//! Identity persistence.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::user::User;
use crate::utils::normalize_address;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UserStoreError {
    #[error("user not found")]
    NotFound,

    #[error("username already taken: {0}")]
    DuplicateUsername(String),

    #[error("wallet address already registered: {0}")]
    DuplicateWalletAddress(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Store of user identities.
///
/// Implementations enforce username and wallet uniqueness themselves;
/// callers rely on [`UserStoreError::DuplicateUsername`] to retry.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Looks up by wallet; `address` is normalized before the lookup.
    async fn find_by_wallet_address(&self, address: &str) -> Result<User, UserStoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<User, UserStoreError>;

    async fn find_by_username(&self, username: &str) -> Result<User, UserStoreError>;

    /// Inserts or updates `user`.
    async fn save(&self, user: &User) -> Result<(), UserStoreError>;
}

/// Process-local store backed by concurrent maps.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
    by_username: DashMap<String, Uuid>,
    by_wallet: DashMap<String, Uuid>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `users`.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Result<Self, UserStoreError> {
        let store = Self::new();
        for user in users {
            store.insert(user)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Index entries are claimed username first, then wallet. Usernames
    /// compare case-insensitively.
    fn insert(&self, mut user: User) -> Result<(), UserStoreError> {
        if user.username.is_empty() {
            return Err(UserStoreError::Backend("username is required".to_string()));
        }
        user.wallet_address = user
            .wallet_address
            .as_deref()
            .map(normalize_address)
            .filter(|address| !address.is_empty());

        let id = user.id;
        let previous = self.users.get(&id).map(|existing| existing.clone());

        let username_entry = self.by_username.entry(user.username.to_lowercase());
        if let Entry::Occupied(entry) = &username_entry {
            if *entry.get() != id {
                return Err(UserStoreError::DuplicateUsername(user.username));
            }
        }

        if let Some(wallet) = &user.wallet_address {
            match self.by_wallet.entry(wallet.clone()) {
                Entry::Occupied(entry) if *entry.get() != id => {
                    return Err(UserStoreError::DuplicateWalletAddress(wallet.clone()));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(id);
                }
            }
        }
        username_entry.or_insert(id);

        let username = user.username.clone();
        let wallet = user.wallet_address.clone();
        self.users.insert(id, user);

        // Drop index entries left behind by a rename or re-binding.
        if let Some(previous) = previous {
            let old_key = previous.username.to_lowercase();
            if old_key != username.to_lowercase() {
                self.by_username.remove_if(&old_key, |_, owner| *owner == id);
            }
            if let Some(old_wallet) = previous.wallet_address {
                if wallet.as_deref() != Some(old_wallet.as_str()) {
                    self.by_wallet.remove_if(&old_wallet, |_, owner| *owner == id);
                }
            }
        }

        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<User, UserStoreError> {
        self.users
            .get(id)
            .map(|user| user.clone())
            .ok_or(UserStoreError::NotFound)
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_wallet_address(&self, address: &str) -> Result<User, UserStoreError> {
        let address = normalize_address(address);
        let id = self
            .by_wallet
            .get(&address)
            .map(|id| *id)
            .ok_or(UserStoreError::NotFound)?;
        self.get(&id)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, UserStoreError> {
        self.get(&id)
    }

    async fn find_by_username(&self, username: &str) -> Result<User, UserStoreError> {
        let id = self
            .by_username
            .get(&username.to_lowercase())
            .map(|id| *id)
            .ok_or(UserStoreError::NotFound)?;
        self.get(&id)
    }

    async fn save(&self, user: &User) -> Result<(), UserStoreError> {
        self.insert(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WALLET: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

    fn user(name: &str, wallet: Option<&str>) -> User {
        let mut user = User::new(name);
        if let Some(wallet) = wallet {
            user.set_wallet_address(wallet);
        }
        user
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryUserRepository::new();
        let alice = user("alice", Some(WALLET));
        store.save(&alice).await.unwrap();

        let by_wallet = store
            .find_by_wallet_address(&WALLET.to_uppercase().replace("0X", "0x"))
            .await
            .unwrap();
        assert_eq!(by_wallet.id, alice.id);
        assert_eq!(store.find_by_id(alice.id).await.unwrap().username, "alice");
        assert_eq!(store.find_by_username("alice").await.unwrap().id, alice.id);
        assert_eq!(store.find_by_username("ALICE").await.unwrap().id, alice.id);
        assert_eq!(
            store.find_by_username("bob").await.unwrap_err(),
            UserStoreError::NotFound
        );
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = InMemoryUserRepository::new();
        store.save(&user("alice", None)).await.unwrap();

        let err = store.save(&user("Alice", Some(WALLET))).await.unwrap_err();
        assert_eq!(err, UserStoreError::DuplicateUsername("Alice".to_string()));
        // The rejected save left no wallet binding behind.
        assert_eq!(
            store.find_by_wallet_address(WALLET).await.unwrap_err(),
            UserStoreError::NotFound
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_wallet() {
        let store = InMemoryUserRepository::new();
        store.save(&user("alice", Some(WALLET))).await.unwrap();

        let err = store.save(&user("bob", Some(WALLET))).await.unwrap_err();
        assert!(matches!(err, UserStoreError::DuplicateWalletAddress(_)));
        assert!(store.find_by_username("bob").await.is_err());
    }

    #[tokio::test]
    async fn test_update_reindexes() {
        let store = InMemoryUserRepository::new();
        let mut alice = user("alice", Some(WALLET));
        store.save(&alice).await.unwrap();

        alice.username = "alice2".to_string();
        alice.set_wallet_address("0x0000000000000000000000000000000000000001");
        store.save(&alice).await.unwrap();

        assert!(store.find_by_username("alice").await.is_err());
        assert!(store.find_by_wallet_address(WALLET).await.is_err());
        assert_eq!(store.find_by_username("alice2").await.unwrap().id, alice.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_username_single_winner() {
        let store = Arc::new(InMemoryUserRepository::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.save(&user("QuickFox1", None)).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_with_users() {
        let store = InMemoryUserRepository::with_users(vec![
            user("alice", Some(WALLET)),
            user("bob", None),
        ])
        .unwrap();
        assert_eq!(store.len(), 2);

        assert!(InMemoryUserRepository::with_users(vec![user("a", None), user("a", None)]).is_err());
    }
}
