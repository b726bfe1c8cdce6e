// web-server/src/api/mod.rs
pub mod auth;
pub mod user;

use actix_web::web;
use common::auth::Web3Authenticator;

use crate::middleware::BearerAuth;

pub const PUBLIC_AUTH_PATH: &str = "/api/v1/public/auth";

pub fn configure(cfg: &mut web::ServiceConfig, authenticator: web::Data<Web3Authenticator>) {
    cfg.service(
        web::scope(PUBLIC_AUTH_PATH)
            .service(auth::challenge)
            .service(auth::verify)
            .service(auth::refresh),
    )
    .service(
        web::scope("/api/v1/user")
            .wrap(BearerAuth::new(authenticator))
            .service(user::info),
    );
}
