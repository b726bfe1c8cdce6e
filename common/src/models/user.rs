// common/src/models/user.rs
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{RuleConfig, UserConfig};
use crate::utils::normalize_address;

/// Storage quota handed to identities created on first UCAN contact (1 GiB).
pub const DEFAULT_QUOTA_BYTES: u64 = 1 << 30;

/// Independent create/read/update/delete flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u8);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid permission letter: {0:?}")]
pub struct PermissionsParseError(pub char);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const CREATE: Permissions = Permissions(1);
    pub const READ: Permissions = Permissions(1 << 1);
    pub const UPDATE: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const ALL: Permissions = Permissions(0b1111);

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Permissions) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Permissions) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether these permissions let `method` run against a target.
    ///
    /// `target_exists` only matters for `PUT`, which creates or updates.
    pub fn allows(self, method: &str, target_exists: bool) -> bool {
        match required_for(method, target_exists) {
            Some(required) => self.contains(required),
            None => false,
        }
    }

    /// Lower-case permission names, for API responses.
    pub fn names(self) -> Vec<&'static str> {
        [
            (Self::CREATE, "create"),
            (Self::READ, "read"),
            (Self::UPDATE, "update"),
            (Self::DELETE, "delete"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self {
        Permissions(self.0 | rhs.0)
    }
}

/// Permission a WebDAV method needs; `None` for methods that are never allowed.
fn required_for(method: &str, target_exists: bool) -> Option<Permissions> {
    let required = match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" | "OPTIONS" | "PROPFIND" => Permissions::READ,
        "MKCOL" | "POST" => Permissions::CREATE,
        "PUT" if target_exists => Permissions::UPDATE,
        "PUT" => Permissions::CREATE,
        "PROPPATCH" | "LOCK" | "UNLOCK" => Permissions::UPDATE,
        "DELETE" => Permissions::DELETE,
        "COPY" => Permissions::READ | Permissions::CREATE,
        "MOVE" => Permissions::UPDATE | Permissions::DELETE,
        _ => return None,
    };
    Some(required)
}

/// True for methods that only need read access.
pub fn is_read_method(method: &str) -> bool {
    required_for(method, true) == Some(Permissions::READ)
}

impl FromStr for Permissions {
    type Err = PermissionsParseError;

    /// Parses letters such as `"CRUD"` or `"r"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut perms = Permissions::NONE;
        for c in s.trim().chars() {
            match c.to_ascii_uppercase() {
                'C' => perms.insert(Permissions::CREATE),
                'R' => perms.insert(Permissions::READ),
                'U' => perms.insert(Permissions::UPDATE),
                'D' => perms.insert(Permissions::DELETE),
                other => return Err(PermissionsParseError(other)),
            }
        }
        Ok(perms)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, letter) in [
            (Self::CREATE, 'C'),
            (Self::READ, 'R'),
            (Self::UPDATE, 'U'),
            (Self::DELETE, 'D'),
        ] {
            if self.contains(flag) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Path-scoped permission override.
///
/// Regex patterns are compiled once on first use and shared read-only
/// afterwards; a pattern that does not compile never matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRule {
    pub path: String,
    pub regex: bool,
    pub permissions: Permissions,
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl UserRule {
    pub fn new(path: impl Into<String>, regex: bool, permissions: Permissions) -> Self {
        Self {
            path: path.into(),
            regex,
            permissions,
            compiled: OnceLock::new(),
        }
    }

    pub fn prefix(path: impl Into<String>, permissions: Permissions) -> Self {
        Self::new(path, false, permissions)
    }

    pub fn pattern(pattern: impl Into<String>, permissions: Permissions) -> Self {
        Self::new(pattern, true, permissions)
    }

    pub fn matches(&self, request_path: &str) -> bool {
        if !self.regex {
            return request_path.starts_with(&self.path);
        }
        self.compiled_regex()
            .is_some_and(|re| re.is_match(request_path))
    }

    /// True if the pattern is a literal prefix or a regex that compiles.
    pub fn is_valid(&self) -> bool {
        !self.regex || self.compiled_regex().is_some()
    }

    fn compiled_regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| Regex::new(&self.path).ok())
            .as_ref()
    }
}

impl TryFrom<&RuleConfig> for UserRule {
    type Error = PermissionsParseError;

    fn try_from(rule: &RuleConfig) -> Result<Self, Self::Error> {
        Ok(UserRule::new(rule.path.clone(), rule.regex, rule.permissions.parse()?))
    }
}

/// An identity that may authenticate with a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub wallet_address: Option<String>,
    pub permissions: Permissions,
    pub rules: Vec<UserRule>,
    /// Storage quota in bytes; zero means unlimited
    pub quota: u64,
    pub used_space: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            wallet_address: None,
            permissions: Permissions::NONE,
            rules: Vec::new(),
            quota: 0,
            used_space: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Binds the identity to a wallet, stored in normalized form.
    pub fn set_wallet_address(&mut self, address: &str) {
        let normalized = normalize_address(address);
        self.wallet_address = (!normalized.is_empty()).then_some(normalized);
        self.touch();
    }

    pub fn set_quota(&mut self, quota: u64) {
        self.quota = quota;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Authorization decision for `method` on `path`.
    ///
    /// The last rule matching the path decides; without one, the user's own
    /// permissions apply.
    pub fn allowed(&self, method: &str, path: &str, target_exists: bool) -> bool {
        let effective = self
            .rules
            .iter()
            .rev()
            .find(|rule| rule.matches(path))
            .map(|rule| rule.permissions)
            .unwrap_or(self.permissions);
        effective.allows(method, target_exists)
    }

    /// Builds a user from its configuration entry.
    pub fn from_config(
        config: &UserConfig,
        default_permissions: Permissions,
    ) -> Result<Self, PermissionsParseError> {
        let mut user = User::new(config.username.clone());
        user.permissions = if config.permissions.trim().is_empty() {
            default_permissions
        } else {
            config.permissions.parse()?
        };
        user.rules = config
            .rules
            .iter()
            .map(UserRule::try_from)
            .collect::<Result<_, _>>()?;
        for rule in user.rules.iter().filter(|rule| !rule.is_valid()) {
            tracing::warn!(
                username = %user.username,
                pattern = %rule.path,
                "rule regex does not compile and will never match"
            );
        }
        user.set_wallet_address(&config.wallet_address);
        Ok(user)
    }
}
