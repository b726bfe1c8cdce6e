// web-server/src/main.rs
mod api;
mod error;
mod middleware;
mod static_files;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use common::auth::{UcanVerifier, Web3Authenticator};
use common::models::user::{Permissions, User};
use common::store::InMemoryUserRepository;
use common::{setup_tracing, Config};

use crate::middleware::{BearerAuth, DavAccess, DavAccessConfig, RateLimiter};
use crate::static_files::DavFilesConfig;

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body("WalletDAV Server")
}

/// Builds the user store from the configured identities.
fn load_users(config: &Config) -> Result<InMemoryUserRepository, String> {
    let default_permissions: Permissions = config
        .webdav
        .permissions
        .parse()
        .map_err(|e| format!("webdav.permissions: {}", e))?;

    let users = config
        .users
        .iter()
        .map(|user| {
            User::from_config(user, default_permissions)
                .map_err(|e| format!("user {}: {}", user.username, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!("Loaded {} configured users", users.len());
    InMemoryUserRepository::with_users(users).map_err(|e| e.to_string())
}

/// Routes shared by every worker.
fn configure(
    cfg: &mut web::ServiceConfig,
    authenticator: web::Data<Web3Authenticator>,
    config: &Config,
) {
    let files = DavFilesConfig::from(&config.webdav);
    let access = DavAccessConfig {
        prefix: config.webdav.prefix.clone(),
        directory: PathBuf::from(&config.webdav.directory),
        app_scope_prefix: config.web3.ucan.app_scope.path_prefix.clone(),
    };

    cfg.app_data(authenticator.clone())
        .service(index)
        .configure(|cfg| api::configure(cfg, authenticator.clone()))
        .service(
            web::scope(&config.webdav.prefix)
                .wrap(DavAccess::new(access))
                .wrap(BearerAuth::new(authenticator))
                .configure(|cfg| static_files::configure(cfg, files)),
        );
}

fn challenge_rate_limiter(config: &Config) -> RateLimiter {
    RateLimiter::new(
        vec![format!("{}/challenge", api::PUBLIC_AUTH_PATH)],
        config.security.challenge_rate_limit,
    )
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load configuration
    let config = Config::from_env();

    // Setup tracing
    if let Err(e) = setup_tracing(&config.log.level) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let store = load_users(&config).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let ucan = UcanVerifier::new(&config.web3.ucan);
    if ucan.enabled() {
        tracing::info!("UCAN authentication enabled for audience {}", ucan.audience());
    }
    let authenticator = web::Data::new(Web3Authenticator::new(
        Arc::new(store),
        &config.web3,
        ucan,
    ));

    // Save address before moving config into the factory
    let server_addr = config.server.address.clone();
    tracing::info!("Starting WalletDAV server on {}", server_addr);
    tracing::info!(
        "Serving {} under {}",
        config.webdav.directory,
        config.webdav.prefix
    );

    let rate_limiter = challenge_rate_limiter(&config);
    let app_authenticator = authenticator.clone();

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .wrap(rate_limiter.clone())
            .configure(|cfg| configure(cfg, app_authenticator.clone(), &config))
    })
    .bind(&server_addr)?
    .run()
    .await?;

    authenticator.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{header, Method, StatusCode};
    use actix_web::test as actix_test;
    use common::models::auth::UserInfo;
    use common::store::UserRepository;
    use common::testutil::{TestAgent, TestWallet, UcanBuilder};
    use common::{RuleConfig, UserConfig};

    const AUDIENCE: &str = "did:web:dav.test";

    struct Fixture {
        config: Config,
        authenticator: web::Data<Web3Authenticator>,
        reader: TestWallet,
        owner: TestWallet,
    }

    async fn fixture() -> Fixture {
        let directory = std::env::temp_dir().join(format!("walletdav-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(directory.join("apps/notes")).unwrap();
        std::fs::create_dir_all(directory.join("apps/photos")).unwrap();
        std::fs::create_dir_all(directory.join("private")).unwrap();
        std::fs::create_dir_all(directory.join("pub")).unwrap();
        std::fs::write(directory.join("hello.txt"), "hello").unwrap();
        std::fs::write(directory.join("apps/notes/today.md"), "notes").unwrap();
        std::fs::write(directory.join("apps/photos/cat.txt"), "cat").unwrap();
        std::fs::write(directory.join("private/secret.txt"), "secret").unwrap();

        let reader = TestWallet::random();
        let owner = TestWallet::random();

        let mut config = Config::default();
        config.webdav.directory = directory.to_string_lossy().into_owned();
        config.web3.jwt_secret = "server-secret".to_string();
        config.web3.ucan.enabled = true;
        config.web3.ucan.audience = AUDIENCE.to_string();
        config.users = vec![
            UserConfig {
                username: "reader".to_string(),
                wallet_address: reader.address(),
                permissions: String::new(),
                rules: Vec::new(),
            },
            UserConfig {
                username: "owner".to_string(),
                wallet_address: owner.address(),
                permissions: "CRUD".to_string(),
                rules: vec![RuleConfig {
                    path: "^/private/.*".to_string(),
                    regex: true,
                    permissions: String::new(),
                }],
            },
        ];

        let store = load_users(&config).unwrap();
        let authenticator = web::Data::new(Web3Authenticator::new(
            Arc::new(store),
            &config.web3,
            UcanVerifier::new(&config.web3.ucan),
        ));

        Fixture {
            config,
            authenticator,
            reader,
            owner,
        }
    }

    macro_rules! server {
        ($fixture:expr) => {
            actix_test::init_service(
                App::new()
                    .wrap(challenge_rate_limiter(&$fixture.config))
                    .configure(|cfg| configure(cfg, $fixture.authenticator.clone(), &$fixture.config)),
            )
            .await
        };
    }

    fn bearer(token: &str) -> (header::HeaderName, String) {
        (header::AUTHORIZATION, format!("Bearer {}", token))
    }

    fn jwt_for(fixture: &Fixture, wallet: &TestWallet) -> String {
        fixture
            .authenticator
            .generate_access_token(&wallet.address())
            .unwrap()
            .token
    }

    #[test]
    fn test_load_users_rejects_bad_permissions() {
        let mut config = Config::default();
        config.users = vec![UserConfig {
            username: "bob".to_string(),
            permissions: "RX".to_string(),
            ..UserConfig::default()
        }];
        assert!(load_users(&config).is_err());

        config.users[0].permissions = "R".to_string();
        assert!(load_users(&config).is_ok());
    }

    #[actix_web::test]
    async fn test_load_users_applies_default_permissions() {
        let fixture = fixture().await;
        let store = load_users(&fixture.config).unwrap();
        let reader = store.find_by_username("reader").await.unwrap();
        assert_eq!(reader.permissions, Permissions::READ);
    }

    #[actix_web::test]
    async fn test_dav_requires_bearer() {
        let fixture = fixture().await;
        let app = server!(fixture);

        let req = actix_test::TestRequest::get().uri("/dav/hello.txt").to_request();
        let err = actix_test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_reader_can_read_but_not_delete() {
        let fixture = fixture().await;
        let app = server!(fixture);
        let token = jwt_for(&fixture, &fixture.reader);

        let req = actix_test::TestRequest::get()
            .uri("/dav/hello.txt")
            .insert_header(bearer(&token))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, "hello");

        let req = actix_test::TestRequest::delete()
            .uri("/dav/hello.txt")
            .insert_header(bearer(&token))
            .to_request();
        let err = actix_test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN);

        let req = actix_test::TestRequest::default()
            .method(Method::from_bytes(b"MKCOL").unwrap())
            .uri("/dav/newdir")
            .insert_header(bearer(&token))
            .to_request();
        let err = actix_test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_rule_blocks_private_folder() {
        let fixture = fixture().await;
        let app = server!(fixture);
        let token = jwt_for(&fixture, &fixture.owner);

        let req = actix_test::TestRequest::get()
            .uri("/dav/hello.txt")
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get()
            .uri("/dav/private/secret.txt")
            .insert_header(bearer(&token))
            .to_request();
        let err = actix_test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_dot_segments_cannot_escape_rules() {
        let fixture = fixture().await;
        let app = server!(fixture);
        let token = jwt_for(&fixture, &fixture.owner);

        for uri in [
            "/dav/pub/../private/secret.txt",
            "/dav/pub/%2E%2E/private/secret.txt",
            "/dav/pub/%2e%2e%2fprivate/secret.txt",
            "/dav/./private/secret.txt",
        ] {
            let req = actix_test::TestRequest::get()
                .uri(uri)
                .insert_header(bearer(&token))
                .to_request();
            let err = actix_test::try_call_service(&app, req).await.unwrap_err();
            assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN, "{}", uri);
        }

        let req = actix_test::TestRequest::get()
            .uri("/dav/private/../hello.txt")
            .insert_header(bearer(&token))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, "hello");
    }

    #[actix_web::test]
    async fn test_paths_above_root_rejected() {
        let fixture = fixture().await;
        let app = server!(fixture);
        let token = jwt_for(&fixture, &fixture.owner);

        for uri in ["/dav/../hello.txt", "/dav/pub/../../etc/passwd", "/dav/%2E%2E/hello.txt"] {
            let req = actix_test::TestRequest::get()
                .uri(uri)
                .insert_header(bearer(&token))
                .to_request();
            let err = actix_test::try_call_service(&app, req).await.unwrap_err();
            assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn test_ucan_app_scope() {
        let fixture = fixture().await;
        let app = server!(fixture);
        let agent = TestAgent::random();

        let root = UcanBuilder::new(fixture.owner.did(), agent.did())
            .capability("app:*", "*")
            .sign_with_wallet(&fixture.owner);
        let token = UcanBuilder::new(agent.did(), AUDIENCE)
            .capability("app:notes", "read")
            .proof(root)
            .sign_with_agent(&agent);

        let req = actix_test::TestRequest::get()
            .uri("/dav/apps/notes/today.md")
            .insert_header(bearer(&token))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, "notes");

        let req = actix_test::TestRequest::get()
            .uri("/dav/apps/photos/cat.txt")
            .insert_header(bearer(&token))
            .to_request();
        let err = actix_test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN);

        let req = actix_test::TestRequest::delete()
            .uri("/dav/apps/notes/today.md")
            .insert_header(bearer(&token))
            .to_request();
        let err = actix_test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN);

        for uri in [
            "/dav/apps/notes/../photos/cat.txt",
            "/dav/apps/notes/%2E%2E/photos/cat.txt",
        ] {
            let req = actix_test::TestRequest::get()
                .uri(uri)
                .insert_header(bearer(&token))
                .to_request();
            let err = actix_test::try_call_service(&app, req).await.unwrap_err();
            assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN, "{}", uri);
        }

        // JWT bearers are not subject to app scope.
        let jwt = jwt_for(&fixture, &fixture.owner);
        let req = actix_test::TestRequest::get()
            .uri("/dav/apps/photos/cat.txt")
            .insert_header(bearer(&jwt))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_user_info() {
        let fixture = fixture().await;
        let app = server!(fixture);
        let token = jwt_for(&fixture, &fixture.reader);

        let req = actix_test::TestRequest::get()
            .uri("/api/v1/user/info")
            .insert_header(bearer(&token))
            .to_request();
        let info: UserInfo = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(info.username, "reader");
        assert_eq!(info.permissions, vec!["read"]);
        assert_eq!(info.wallet_address, Some(fixture.reader.address()));
    }

    #[actix_web::test]
    async fn test_challenge_rate_limited() {
        let mut fixture = fixture().await;
        fixture.config.security.challenge_rate_limit = 2;
        let app = server!(fixture);

        let req = || {
            actix_test::TestRequest::post()
                .uri("/api/v1/public/auth/challenge")
                .peer_addr("192.0.2.1:5000".parse().unwrap())
                .set_json(serde_json::json!({ "address": fixture.reader.address() }))
                .to_request()
        };
        assert_eq!(actix_test::call_service(&app, req()).await.status(), StatusCode::OK);
        assert_eq!(actix_test::call_service(&app, req()).await.status(), StatusCode::OK);

        let err = actix_test::try_call_service(&app, req()).await.unwrap_err();
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));
    }
}
