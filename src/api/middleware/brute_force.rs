//! Per-route, per-client request limits.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tower::{Layer, Service};

use crate::error::{code, AppError, Result};

type Limiter = DefaultKeyedRateLimiter<String>;

/// GCRA limiter keyed by client IP. Each guarded route owns one, so limits
/// are counted per route.
#[derive(Clone)]
pub struct BruteForce {
    limiter: Arc<Limiter>,
    limit: u32,
    trust_proxy: bool,
}

impl BruteForce {
    /// Allows `limit` requests per `window`, all of which may arrive at once.
    pub fn new(limit: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_hour(burst))
            .allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            limit: burst.get(),
            trust_proxy: false,
        }
    }

    /// Keys on the address the reverse proxy reports instead of the peer.
    pub fn behind_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    pub fn check(&self, client: &str) -> Result<()> {
        self.limiter.check_key(&client.to_string()).map_err(|_| {
            tracing::info!(client, limit = self.limit, "Brute-force guard tripped");
            AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                code::TOO_MANY_REQUESTS,
                "Too many requests in this time frame.",
            )
        })
    }
}

/// Hands out one [`BruteForce`] per guarded route, all over the same window,
/// and keeps track of them so idle clients can be forgotten.
#[derive(Clone)]
pub struct Guards {
    window: Duration,
    trust_proxy: bool,
    limiters: Arc<Mutex<Vec<Arc<Limiter>>>>,
}

impl Guards {
    pub fn new(window: Duration, trust_proxy: bool) -> Self {
        Self {
            window,
            trust_proxy,
            limiters: Arc::default(),
        }
    }

    pub fn limit(&self, limit: u32) -> BruteForce {
        let guard = BruteForce::new(limit, self.window).behind_proxy(self.trust_proxy);
        self.registry().push(guard.limiter.clone());
        guard
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Arc<Limiter>>> {
        self.limiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops clients whose limits have fully replenished. Returns how many
    /// clients are still tracked across all routes.
    pub fn prune(&self) -> usize {
        self.registry()
            .iter()
            .map(|limiter| {
                limiter.retain_recent();
                limiter.shrink_to_fit();
                limiter.len()
            })
            .sum()
    }

    pub fn tracked_clients(&self) -> usize {
        self.registry().iter().map(|limiter| limiter.len()).sum()
    }
}

/// The address requests are limited by.
///
/// Behind a trusted proxy that is the right-most `X-Forwarded-For` entry,
/// the one the proxy itself appended. Otherwise the header is ignored and
/// the peer address is used.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S> Layer<S> for BruteForce {
    type Service = BruteForceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BruteForceService {
            inner,
            guard: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BruteForceService<S> {
    inner: S,
    guard: BruteForce,
}

impl<S> Service<Request> for BruteForceService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let client = client_ip(request.headers(), peer, self.guard.trust_proxy);
        match self.guard.check(&client) {
            Ok(()) => Box::pin(self.inner.call(request)),
            Err(error) => Box::pin(async move { Ok(error.into_response()) }),
        }
    }
}
