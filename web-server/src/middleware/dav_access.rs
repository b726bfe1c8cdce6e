// web-server/src/middleware/dav_access.rs
use std::path::{Path, PathBuf};
use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use common::auth::ucan::UcanContext;
use common::models::user::{is_read_method, User};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use percent_encoding::percent_decode_str;

use crate::error::ApiError;

/// Where the WebDAV tree lives and how app-scoped folders are laid out.
#[derive(Debug, Clone)]
pub struct DavAccessConfig {
    /// URL prefix the tree is mounted under
    pub prefix: String,
    /// Backing directory, used to tell creates from updates
    pub directory: PathBuf,
    /// Folder whose children are app ids
    pub app_scope_prefix: String,
}

/// Applies the user's permission rules, and for UCAN bearers the app
/// scope, to every request. Runs after [`BearerAuth`](super::BearerAuth).
pub struct DavAccess {
    config: Rc<DavAccessConfig>,
}

impl DavAccess {
    pub fn new(config: DavAccessConfig) -> Self {
        Self {
            config: Rc::new(config),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for DavAccess
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = DavAccessMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(DavAccessMiddleware {
            service: Rc::new(service),
            config: Rc::clone(&self.config),
        }))
    }
}

pub struct DavAccessMiddleware<S> {
    service: Rc<S>,
    config: Rc<DavAccessConfig>,
}

impl<S, B> Service<ServiceRequest> for DavAccessMiddleware<S>
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
        let config = Rc::clone(&self.config);

        Box::pin(async move {
            let method = req.method().as_str().to_string();
            let Some(path) = dav_path(req.path(), &config.prefix) else {
                tracing::warn!(path = %req.path(), "rejected path outside the dav root");
                return Err(ApiError::BadRequest("Invalid path".into()).into());
            };
            let (user, ucan) = {
                let extensions = req.extensions();
                (
                    extensions.get::<User>().cloned(),
                    extensions.get::<UcanContext>().cloned(),
                )
            };

            let Some(user) = user else {
                return Err(ApiError::unauthorized().into());
            };

            let target_exists = if method.eq_ignore_ascii_case("PUT") {
                tokio::fs::metadata(local_path(&config.directory, &path))
                    .await
                    .is_ok()
            } else {
                true
            };

            if !user.allowed(&method, &path, target_exists) {
                tracing::warn!(
                    username = %user.username,
                    method = %method,
                    path = %path,
                    "permission denied"
                );
                return Err(ApiError::Forbidden("Access denied").into());
            }

            if let Some(ucan) = ucan {
                if let Some(app_id) = app_for_path(&path, &config.app_scope_prefix) {
                    let action = if is_read_method(&method) { "read" } else { "write" };
                    if !ucan.allows(app_id, action) {
                        tracing::warn!(
                            username = %user.username,
                            app = %app_id,
                            action,
                            "ucan does not grant app access"
                        );
                        return Err(ApiError::Forbidden("Access denied").into());
                    }
                }
            }

            service.call(req).await
        })
    }
}

/// Request path relative to the mount prefix, always starting with `/`.
///
/// Escapes are decoded and `.`/`..` segments resolved the same way the file
/// service resolves them, so rules see the file that will actually be
/// touched. `None` when the path is not under `prefix`, climbs above it, or
/// is not UTF-8.
fn dav_path(request_path: &str, prefix: &str) -> Option<String> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
    let mut segments = decoded.split('/').filter(|segment| !segment.is_empty());
    for expected in prefix.split('/').filter(|segment| !segment.is_empty()) {
        if segments.next()? != expected {
            return None;
        }
    }

    let mut resolved: Vec<&str> = Vec::new();
    for segment in segments {
        match segment {
            "." => {}
            ".." => {
                resolved.pop()?;
            }
            segment => resolved.push(segment),
        }
    }

    let mut path = format!("/{}", resolved.join("/"));
    if !resolved.is_empty() && decoded.ends_with('/') {
        path.push('/');
    }
    Some(path)
}

/// Maps a path produced by [`dav_path`] into `root`.
fn local_path(root: &Path, dav_path: &str) -> PathBuf {
    dav_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// App id for paths under `<app_prefix>/<app id>/`.
fn app_for_path<'a>(path: &'a str, app_prefix: &str) -> Option<&'a str> {
    let app_prefix = app_prefix.trim_end_matches('/');
    if app_prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(app_prefix)?.strip_prefix('/')?;
    rest.split('/').next().filter(|app| !app.is_empty())
}
