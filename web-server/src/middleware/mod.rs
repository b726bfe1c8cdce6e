// web-server/src/middleware/mod.rs
pub mod bearer_auth;
pub mod dav_access;
pub mod rate_limiter;

pub use bearer_auth::BearerAuth;
pub use dav_access::{DavAccess, DavAccessConfig};
pub use rate_limiter::RateLimiter;
