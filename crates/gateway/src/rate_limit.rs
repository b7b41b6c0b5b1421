//! Per-user, per-route fixed-window rate limiter.
//!
//! Sits after authentication so anonymous traffic cannot exhaust a
//! real user's budget. Counters are process-local by default; with a
//! Redis store configured they become cluster-wide via `INCR` +
//! `EXPIRE` on the window's first hit.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use parking_lot::Mutex;

use forge_domain::config::RateLimitConfig;
use forge_domain::error::{Error, Result};

use crate::auth::AuthedUser;
use crate::state::AppState;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Seconds until the window rolls over. Zero when allowed.
    pub retry_after: u64,
}

impl Decision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: 0,
        }
    }
}

enum Backend {
    Disabled,
    Memory(Mutex<HashMap<String, i64>>),
    Redis(redis::Client),
}

pub struct RateLimiter {
    cfg: RateLimitConfig,
    backend: Backend,
}

impl RateLimiter {
    pub fn from_config(cfg: &RateLimitConfig) -> Result<Self> {
        let backend = if !cfg.enabled {
            Backend::Disabled
        } else if let Some(url) = cfg.store.as_deref() {
            Backend::Redis(redis::Client::open(url).map_err(|e| Error::Store(e.to_string()))?)
        } else {
            Backend::Memory(Mutex::new(HashMap::new()))
        };
        Ok(Self {
            cfg: cfg.clone(),
            backend,
        })
    }

    /// Count one request against `(user, route)`.
    pub async fn check(&self, user: &str, route: &str) -> Result<Decision> {
        let now_ms = Utc::now().timestamp_millis();
        let window = now_ms.div_euclid(self.cfg.window_ms.max(1));
        let remaining_ms = self.cfg.window_ms - now_ms.rem_euclid(self.cfg.window_ms.max(1));

        let count = match &self.backend {
            Backend::Disabled => return Ok(Decision::allowed()),
            Backend::Memory(map) => {
                let key = format!("{user}|{route}|{window}");
                let mut map = map.lock();
                // Old windows never get hit again; stop them from
                // accumulating.
                if map.len() > 4096 {
                    let stale = format!("|{}", window - 1);
                    map.retain(|k, _| !k.ends_with(&stale));
                }
                let count = map.entry(key).or_insert(0);
                *count += 1;
                *count
            }
            Backend::Redis(client) => {
                let mut conn = client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                let key = format!("rl:{user}:{route}:{window}");
                let count: i64 = redis::cmd("INCR")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                if count == 1 {
                    let ttl_secs = (self.cfg.window_ms / 1000).max(1);
                    let _: bool = redis::cmd("EXPIRE")
                        .arg(&key)
                        .arg(ttl_secs)
                        .query_async(&mut conn)
                        .await
                        .map_err(|e| Error::Store(e.to_string()))?;
                }
                count
            }
        };

        if count > self.cfg.max_requests {
            return Ok(Decision {
                allowed: false,
                retry_after: (remaining_ms as u64).div_ceil(1000).max(1),
            });
        }
        Ok(Decision::allowed())
    }
}

/// Axum middleware applying the limiter to authenticated routes.
pub async fn enforce(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(AuthedUser(user)) = req.extensions().get::<AuthedUser>().cloned() else {
        // Auth middleware runs first; a missing extension is a wiring
        // bug, not an anonymous free pass.
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"error": "unauthenticated"})),
        )
            .into_response();
    };

    let route = req.uri().path().to_owned();
    match state.rate_limiter.check(&user, &route).await {
        Ok(decision) if decision.allowed => next.run(req).await,
        Ok(decision) => (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", decision.retry_after.to_string())],
            axum::Json(serde_json::json!({
                "error": "rate limit exceeded",
                "retryAfter": decision.retry_after,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "rate limiter backend failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({"error": "rate limiter unavailable"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: i64) -> RateLimiter {
        RateLimiter::from_config(&RateLimitConfig {
            enabled: true,
            window_ms: 60_000,
            max_requests: max,
            store: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn under_limit_is_allowed() {
        let rl = limiter(2);
        assert!(rl.check("u1", "/chat").await.unwrap().allowed);
        assert!(rl.check("u1", "/chat").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn over_limit_reports_retry_after() {
        let rl = limiter(2);
        rl.check("u1", "/chat").await.unwrap();
        rl.check("u1", "/chat").await.unwrap();
        let third = rl.check("u1", "/chat").await.unwrap();
        assert!(!third.allowed);
        assert!(third.retry_after > 0);
        assert!(third.retry_after <= 60);
    }

    #[tokio::test]
    async fn users_do_not_share_counters() {
        let rl = limiter(1);
        assert!(rl.check("u1", "/chat").await.unwrap().allowed);
        assert!(!rl.check("u1", "/chat").await.unwrap().allowed);
        assert!(rl.check("u2", "/chat").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn routes_do_not_share_counters() {
        let rl = limiter(1);
        assert!(rl.check("u1", "/chat").await.unwrap().allowed);
        assert!(!rl.check("u1", "/chat").await.unwrap().allowed);
        assert!(rl.check("u1", "/tools").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let rl = RateLimiter::from_config(&RateLimitConfig::default()).unwrap();
        for _ in 0..100 {
            assert!(rl.check("u1", "/chat").await.unwrap().allowed);
        }
    }
}
