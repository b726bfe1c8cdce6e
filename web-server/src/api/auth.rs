// web-server/src/api/auth.rs
use actix_web::{post, web, HttpResponse};
use common::auth::Web3Authenticator;
use common::models::auth::{
    ChallengeRequest, ChallengeResponse, RefreshRequest, RefreshResponse, VerifyRequest,
    VerifyResponse,
};
use common::AuthError;

use crate::error::ApiError;

/// Issue a sign-in challenge for a wallet
#[post("/challenge")]
pub async fn challenge(
    authenticator: web::Data<Web3Authenticator>,
    body: web::Json<ChallengeRequest>,
) -> Result<HttpResponse, ApiError> {
    if body.address.trim().is_empty() {
        return Err(ApiError::BadRequest("Address is required".into()));
    }

    let issued = authenticator.create_challenge(&body.address)?;
    tracing::info!(address = %issued.address, "Issued login challenge");

    Ok(HttpResponse::Ok().json(ChallengeResponse::from(&issued)))
}

/// Trade a signed challenge for access and refresh tokens
#[post("/verify")]
pub async fn verify(
    authenticator: web::Data<Web3Authenticator>,
    body: web::Json<VerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    if body.address.trim().is_empty() || body.signature.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Address and signature are required".into(),
        ));
    }

    let access = authenticator.verify_signature(&body.address, &body.signature)?;
    let user = authenticator
        .ensure_user_by_wallet(&access.subject, false)
        .await
        .map_err(|e| {
            if matches!(e, AuthError::UserNotFound) {
                tracing::warn!(address = %access.subject, "Signed in with unregistered wallet");
            }
            ApiError::from(e)
        })?;
    let refresh_token = authenticator.generate_refresh_token(&access.subject)?;

    tracing::info!(username = %user.username, "Wallet login succeeded");
    Ok(HttpResponse::Ok().json(VerifyResponse::new(access, refresh_token, &user)))
}

/// Exchange a refresh token for a new access token
#[post("/refresh")]
pub async fn refresh(
    authenticator: web::Data<Web3Authenticator>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    if body.refresh_token.trim().is_empty() {
        return Err(ApiError::BadRequest("Refresh token is required".into()));
    }

    let address = authenticator.verify_refresh_token(body.refresh_token.trim())?;
    // The identity may have been removed since the refresh token was issued.
    authenticator
        .ensure_user_by_wallet(&address, false)
        .await
        .map_err(|e| match e {
            AuthError::UserNotFound => ApiError::unauthorized(),
            other => ApiError::from(other),
        })?;

    let access = authenticator.generate_access_token(&address)?;
    Ok(HttpResponse::Ok().json(RefreshResponse::from(access)))
}
