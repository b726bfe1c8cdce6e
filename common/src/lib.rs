// common/src/lib.rs
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod utils;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::*;
pub use error::{AuthError, SignatureError};
pub use utils::*;
