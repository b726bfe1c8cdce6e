// common/tests/provisioning_test.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::auth::{NameGenerator, UcanVerifier, Web3Authenticator};
use common::models::user::User;
use common::store::{InMemoryUserRepository, UserRepository, UserStoreError};
use common::testutil::TestWallet;
use common::{AuthError, Web3Config};
use uuid::Uuid;

/// Reports the first `rejections` saves as username collisions.
struct CollidingStore {
    inner: InMemoryUserRepository,
    rejections: usize,
    attempts: AtomicUsize,
}

impl CollidingStore {
    fn new(rejections: usize) -> Self {
        Self {
            inner: InMemoryUserRepository::new(),
            rejections,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UserRepository for CollidingStore {
    async fn find_by_wallet_address(&self, address: &str) -> Result<User, UserStoreError> {
        self.inner.find_by_wallet_address(address).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, UserStoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<User, UserStoreError> {
        self.inner.find_by_username(username).await
    }

    async fn save(&self, user: &User) -> Result<(), UserStoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.rejections {
            return Err(UserStoreError::DuplicateUsername(user.username.clone()));
        }
        self.inner.save(user).await
    }
}

fn authenticator(store: Arc<CollidingStore>) -> Web3Authenticator {
    let config = Web3Config {
        jwt_secret: "provisioning-secret".to_string(),
        auto_create_on_ucan: true,
        ..Web3Config::default()
    };
    Web3Authenticator::new(store, &config, UcanVerifier::disabled())
        .with_name_generator(NameGenerator::seeded(1))
}

#[tokio::test]
async fn test_succeeds_on_fifth_attempt() {
    let store = Arc::new(CollidingStore::new(4));
    let auth = authenticator(store.clone());
    let wallet = TestWallet::random();

    let user = auth.create_user_from_wallet(&wallet.address()).await.unwrap();

    assert_eq!(store.attempts.load(Ordering::SeqCst), 5);
    let stored = store.find_by_wallet_address(&wallet.address()).await.unwrap();
    assert_eq!(stored.id, user.id);
    assert_eq!(stored.username, user.username);
}

#[tokio::test]
async fn test_gives_up_after_five_attempts() {
    let store = Arc::new(CollidingStore::new(5));
    let auth = authenticator(store.clone());
    let wallet = TestWallet::random();

    let result = auth.create_user_from_wallet(&wallet.address()).await;

    assert!(matches!(result, Err(AuthError::ProvisioningFailed(_))));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 5);
    assert!(store.inner.is_empty());
    assert!(matches!(
        store.find_by_wallet_address(&wallet.address()).await,
        Err(UserStoreError::NotFound)
    ));
}

#[tokio::test]
async fn test_malformed_address_never_provisions() {
    let store = Arc::new(CollidingStore::new(0));
    let auth = authenticator(store.clone());

    for address in ["", "   ", "0xnot-an-address"] {
        assert!(matches!(
            auth.create_user_from_wallet(address).await,
            Err(AuthError::ProvisioningFailed(_))
        ));
    }
    assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_provisioning_of_distinct_wallets() {
    let store = Arc::new(CollidingStore::new(0));
    let auth = Arc::new(authenticator(store.clone()));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move {
                let wallet = TestWallet::random();
                auth.create_user_from_wallet(&wallet.address()).await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(store.inner.len(), 10);
}

#[tokio::test]
async fn test_concurrent_provisioning_of_same_wallet() {
    let store = Arc::new(CollidingStore::new(0));
    let auth = Arc::new(authenticator(store.clone()));
    let wallet = TestWallet::random();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let auth = auth.clone();
            let address = wallet.address();
            tokio::spawn(async move { auth.create_user_from_wallet(&address).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.inner.len(), 1);
}
