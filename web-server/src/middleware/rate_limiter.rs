// web-server/src/middleware/rate_limiter.rs
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpResponse, ResponseError,
};
use common::models::auth::ErrorResponse;
use dashmap::DashMap;
use futures_util::future::{ready, LocalBoxFuture, Ready};

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// Custom error for rate limiting
#[derive(Debug)]
struct RateLimitExceeded {
    retry_after: Duration,
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rate limit exceeded")
    }
}

impl ResponseError for RateLimitExceeded {
    fn error_response(&self) -> HttpResponse {
        // Round up so clients never retry early.
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        HttpResponse::TooManyRequests()
            .append_header((header::RETRY_AFTER, secs.max(1).to_string()))
            .json(ErrorResponse::new("Rate limit exceeded. Please try again later."))
    }
}

/// Sliding-window limiter keyed by client IP, applied to requests whose
/// path starts with one of `paths`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    paths: Vec<String>,
    max_requests: usize,
    window: Duration,
    store: Arc<DashMap<String, Vec<Instant>>>,
    last_sweep: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(paths: Vec<String>, max_requests: usize) -> Self {
        Self {
            paths,
            max_requests,
            window: RATE_LIMIT_WINDOW,
            store: Arc::new(DashMap::new()),
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// `Some(wait)` when `ip` is over the limit.
    fn check(&self, ip: &str) -> Option<Duration> {
        let now = Instant::now();
        let verdict = {
            let mut hits = self.store.entry(ip.to_string()).or_default();
            hits.retain(|time| now.duration_since(*time) < self.window);

            if hits.len() >= self.max_requests {
                let oldest = hits.first().copied().unwrap_or(now);
                Some(self.window.saturating_sub(now.duration_since(oldest)))
            } else {
                hits.push(now);
                None
            }
        };
        // The entry guard must be released before touching other shards.
        self.evict_idle(now);
        verdict
    }

    /// Drops clients with no hits inside the window, at most once per window.
    fn evict_idle(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.lock() else {
            return;
        };
        if now.duration_since(*last_sweep) < self.window {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let window = self.window;
        self.store
            .retain(|_, hits| hits.last().is_some_and(|time| now.duration_since(*time) < window));
    }

    fn applies_to(&self, path: &str) -> bool {
        self.paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimiterMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimiterMiddleware {
            service,
            limiter: self.clone(),
        }))
    }
}

pub struct RateLimiterMiddleware<S> {
    service: S,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimiterMiddleware<S>
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
        if self.limiter.applies_to(req.path()) {
            let ip = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();

            if let Some(retry_after) = self.limiter.check(&ip) {
                tracing::warn!("Rate limit exceeded for IP: {}", ip);
                return Box::pin(async move { Err(RateLimitExceeded { retry_after }.into()) });
            }
        }

        let fut = self.service.call(req);
        Box::pin(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, web, App};

    #[test]
    fn test_check_counts_per_ip() {
        let limiter = RateLimiter::new(vec!["/limited".into()], 2);
        assert!(limiter.check("1.1.1.1").is_none());
        assert!(limiter.check("1.1.1.1").is_none());
        let wait = limiter.check("1.1.1.1").unwrap();
        assert!(wait <= RATE_LIMIT_WINDOW);
        assert!(limiter.check("2.2.2.2").is_none());
    }

    #[test]
    fn test_window_expiry() {
        let mut limiter = RateLimiter::new(vec![], 1);
        limiter.window = Duration::from_millis(20);
        assert!(limiter.check("ip").is_none());
        assert!(limiter.check("ip").is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("ip").is_none());
    }

    #[test]
    fn test_idle_clients_evicted() {
        let mut limiter = RateLimiter::new(vec![], 5);
        limiter.window = Duration::from_millis(200);
        assert!(limiter.check("10.0.0.1").is_none());
        assert!(limiter.check("10.0.0.2").is_none());
        assert_eq!(limiter.store.len(), 2);

        std::thread::sleep(Duration::from_millis(250));
        assert!(limiter.check("10.0.0.3").is_none());
        assert_eq!(limiter.store.len(), 1);
        assert!(limiter.store.contains_key("10.0.0.3"));
    }

    #[actix_web::test]
    async fn test_middleware_returns_429() {
        let app = actix_test::init_service(
            App::new()
                .wrap(RateLimiter::new(vec!["/limited".into()], 1))
                .route("/limited", web::post().to(HttpResponse::Ok))
                .route("/free", web::post().to(HttpResponse::Ok)),
        )
        .await;

        let req = || {
            actix_test::TestRequest::post()
                .uri("/limited")
                .peer_addr("10.0.0.1:4000".parse().unwrap())
                .to_request()
        };
        let resp = actix_test::call_service(&app, req()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let err = actix_test::try_call_service(&app, req()).await.unwrap_err();
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));

        for _ in 0..3 {
            let free = actix_test::TestRequest::post()
                .uri("/free")
                .peer_addr("10.0.0.1:4000".parse().unwrap())
                .to_request();
            assert_eq!(actix_test::call_service(&app, free).await.status(), StatusCode::OK);
        }
    }
}
