// common/src/config.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use config::{Config as ConfigFile, File, Environment};

/// Central configuration for the WalletDAV server
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub webdav: WebDavConfig,
    pub web3: Web3Config,
    pub security: SecurityConfig,
    /// Identities seeded into the user store at startup
    pub users: Vec<UserConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDavConfig {
    /// URL prefix the WebDAV tree is mounted under
    pub prefix: String,
    /// Directory served under the prefix
    pub directory: String,
    /// Default CRUD letters for users without their own
    pub permissions: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Web3Config {
    /// HMAC secret for access/refresh tokens; random per process when empty
    pub jwt_secret: String,
    pub token_expiration_secs: i64,
    pub refresh_token_expiration_secs: i64,
    /// Provision an identity the first time an unknown wallet presents a valid UCAN
    pub auto_create_on_ucan: bool,
    pub ucan: UcanConfig,
}

/// UCAN trust parameters
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UcanConfig {
    pub enabled: bool,
    pub audience: String,
    pub required_resource: String,
    pub required_action: String,
    pub app_scope: AppScopeConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppScopeConfig {
    /// Requests below `<path_prefix>/<app id>/` need a matching `app:<app id>` capability
    pub path_prefix: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Challenge requests allowed per client IP per minute
    pub challenge_rate_limit: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub username: String,
    pub wallet_address: String,
    /// CRUD letters; empty means the WebDAV default
    pub permissions: String,
    pub rules: Vec<RuleConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub path: String,
    pub regex: bool,
    pub permissions: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:6065".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            prefix: "/dav".to_string(),
            directory: "./data".to_string(),
            permissions: "R".to_string(),
        }
    }
}

impl Default for Web3Config {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expiration_secs: 24 * 60 * 60,
            refresh_token_expiration_secs: 30 * 24 * 60 * 60,
            auto_create_on_ucan: false,
            ucan: UcanConfig::default(),
        }
    }
}

impl Default for AppScopeConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/apps".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            challenge_rate_limit: 10,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // e.g. APP__WEB3__JWT_SECRET
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Load configuration, falling back to defaults when the sources are unusable
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration: {}", e);
                tracing::info!("Falling back to built-in defaults");
                Self::default()
            }
        }
    }
}
