//! Per-IP request quotas for `/auth` and `/capture`.
//!
//! Each route has its own keyed GCRA limiter whose burst equals the
//! per-minute quota. Admin licenses are never counted; that decision is made
//! by the handler because it needs the license record.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;

use axum::http::HeaderMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Auth,
    Capture,
}

pub struct RateLimits {
    auth: DefaultKeyedRateLimiter<IpAddr>,
    capture: DefaultKeyedRateLimiter<IpAddr>,
}

fn per_minute(n: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
}

impl RateLimits {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            auth: RateLimiter::keyed(per_minute(config.auth_per_minute)),
            capture: RateLimiter::keyed(per_minute(config.capture_per_minute)),
        }
    }

    /// Count one request from `ip`. Returns `false` once the quota is spent.
    pub fn check(&self, route: Route, ip: IpAddr) -> bool {
        let limiter = match route {
            Route::Auth => &self.auth,
            Route::Capture => &self.capture,
        };
        limiter.check_key(&ip).is_ok()
    }

    /// Forget clients whose buckets have fully refilled.
    pub fn retain_recent(&self) {
        self.auth.retain_recent();
        self.capture.retain_recent();
    }
}

/// Resolve the client address. Behind a proxy the first `X-Forwarded-For`
/// hop wins; a malformed header falls back to the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.ip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limits(auth: u32, capture: u32) -> RateLimits {
        RateLimits::new(&RateLimitConfig {
            auth_per_minute: auth,
            capture_per_minute: capture,
        })
    }

    #[test]
    fn quota_is_per_route_and_per_ip() {
        let l = limits(2, 3);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(l.check(Route::Auth, a));
        assert!(l.check(Route::Auth, a));
        assert!(!l.check(Route::Auth, a));

        assert!(l.check(Route::Auth, b));
        for _ in 0..3 {
            assert!(l.check(Route::Capture, a));
        }
        assert!(!l.check(Route::Capture, a));
    }

    #[test]
    fn forwarded_for_only_when_trusted() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );

        assert_eq!(client_ip(&headers, peer, false), peer.ip());
        assert_eq!(
            client_ip(&headers, peer, true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(client_ip(&headers, peer, true), peer.ip());
    }
}
