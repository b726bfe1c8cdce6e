// web-server/src/middleware/bearer_auth.rs
use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    web, Error, HttpMessage,
};
use common::auth::Web3Authenticator;
use common::AuthError;
use futures_util::future::{ready, LocalBoxFuture, Ready};

use crate::error::ApiError;

/// Cookie the browser client sets when it cannot send headers (media range requests).
pub const AUTH_COOKIE_NAME: &str = "authToken";

/// Resolves the bearer token to a user and stores it in the request
/// extensions, together with the UCAN app capabilities when present.
#[derive(Clone)]
pub struct BearerAuth {
    authenticator: web::Data<Web3Authenticator>,
}

impl BearerAuth {
    pub fn new(authenticator: web::Data<Web3Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = BearerAuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthMiddleware {
            service: Rc::new(service),
            authenticator: self.authenticator.clone(),
        }))
    }
}

pub struct BearerAuthMiddleware<S> {
    service: Rc<S>,
    authenticator: web::Data<Web3Authenticator>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<ServiceResponse<B>, Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let authenticator = self.authenticator.clone();

        Box::pin(async move {
            let Some(token) = bearer_token(&req) else {
                tracing::debug!("Request to {} without bearer token", req.path());
                return Err(ApiError::unauthorized().into());
            };

            let authenticated = match authenticator.authenticate(&token).await {
                Ok(authenticated) => authenticated,
                Err(e) if e.is_unauthorized() || matches!(e, AuthError::UserNotFound) => {
                    tracing::debug!("Bearer authentication rejected: {}", e);
                    return Err(ApiError::unauthorized().into());
                }
                Err(e) => return Err(ApiError::from(e).into()),
            };

            {
                let mut extensions = req.extensions_mut();
                extensions.insert(authenticated.user);
                if let Some(ucan) = authenticated.ucan {
                    extensions.insert(ucan);
                }
            }

            service.call(req).await
        })
    }
}

/// `Authorization: Bearer <token>`, falling back to the auth cookie.
fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty());

    from_header.or_else(|| {
        req.cookie(AUTH_COOKIE_NAME)
            .map(|cookie| cookie.value().trim().to_string())
            .filter(|token| !token.is_empty())
    })
}
