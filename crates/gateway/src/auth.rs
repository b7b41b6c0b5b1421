//! End-user and admin authentication.
//!
//! End users present a JWT. In `trust` mode the envelope is decoded
//! and the signature ignored (an upstream gateway already verified
//! it); in `verify` mode the token must be HS256 and the HMAC is
//! recomputed with the configured signing key. The user id is the
//! claim at the configured dotted path (default `sub`).
//!
//! Admin requests carry a plain shared secret, compared in constant
//! time. No configured admin key means the admin surface is off.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use forge_domain::config::{AuthConfig, AuthMode};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of token authentication. Failures carry a bounded message
/// and never raise.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub error: Option<String>,
}

impl AuthOutcome {
    fn ok(user_id: String) -> Self {
        Self {
            authenticated: true,
            user_id: Some(user_id),
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            user_id: None,
            error: Some(error.into()),
        }
    }
}

/// The authenticated user id, inserted into request extensions by the
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JWT handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Authenticate a bearer token under the configured mode.
pub fn authenticate(cfg: &AuthConfig, token: Option<&str>) -> AuthOutcome {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return AuthOutcome::fail("missing token");
    };

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return AuthOutcome::fail("malformed token: expected header.payload.signature");
    }

    if cfg.mode == AuthMode::Verify {
        let Some(key) = cfg.signing_key.as_deref().filter(|k| !k.is_empty()) else {
            return AuthOutcome::fail("verify mode without signing key");
        };
        if let Err(e) = verify_hs256(parts[0], parts[1], parts[2], key) {
            return AuthOutcome::fail(e);
        }
    }

    let claims = match decode_segment(parts[1]) {
        Ok(v) => v,
        Err(e) => return AuthOutcome::fail(format!("undecodable claims: {e}")),
    };

    match walk_claims(&claims, &cfg.claims_path) {
        Some(user_id) if !user_id.is_empty() => AuthOutcome::ok(user_id),
        _ => AuthOutcome::fail(format!("no claim at \"{}\"", cfg.claims_path)),
    }
}

fn decode_segment(segment: &str) -> Result<Value, String> {
    // Tolerate padded tokens from sloppy encoders.
    let trimmed = segment.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn verify_hs256(header: &str, payload: &str, signature: &str, key: &str) -> Result<(), String> {
    let header_json = decode_segment(header).map_err(|e| format!("undecodable header: {e}"))?;
    let alg = header_json.get("alg").and_then(|v| v.as_str()).unwrap_or("");
    if alg != "HS256" {
        return Err(format!("unsupported algorithm \"{alg}\""));
    }

    let provided = URL_SAFE_NO_PAD
        .decode(signature.trim_end_matches('='))
        .map_err(|e| format!("undecodable signature: {e}"))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| format!("bad signing key: {e}"))?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    if provided.len() != expected.len()
        || !bool::from(provided.as_slice().ct_eq(expected.as_slice()))
    {
        return Err("signature mismatch".into());
    }
    Ok(())
}

/// Walk a dotted path into a JSON object, returning the value at the
/// end as a string. Numbers are stringified; everything else is not a
/// user id.
pub fn walk_claims(claims: &Value, path: &str) -> Option<String> {
    let mut current = claims;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pull the bearer token from the `Authorization` header, falling back
/// to the `?token=` query parameter. The header wins when both are
/// present.
pub fn extract_token(req: &Request<Body>) -> Option<String> {
    let from_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    if from_header.is_some() {
        return from_header;
    }

    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("token=").map(str::to_owned)
        })
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Enforce end-user authentication on the agent API routes.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_token(&req);
    let outcome = authenticate(&state.config.auth, token.as_deref());
    match outcome.user_id {
        Some(user_id) if outcome.authenticated => {
            req.extensions_mut().insert(AuthedUser(user_id));
            next.run(req).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": outcome.error.unwrap_or_else(|| "unauthorized".into()),
            })),
        )
            .into_response(),
    }
}

/// Enforce the admin shared secret on the forge-admin routes.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_key.as_deref().filter(|k| !k.is_empty()) else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({"error": "No admin key"})),
        )
            .into_response();
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash both sides to fixed length before the constant-time compare
    // so the token length is not observable either.
    use sha2::Digest;
    let provided_hash = Sha256::digest(provided.as_bytes());
    let expected_hash = Sha256::digest(expected.as_bytes());
    if !bool::from(provided_hash.as_slice().ct_eq(expected_hash.as_slice())) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"error": "invalid admin token"})),
        )
            .into_response();
    }

    next.run(req).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    /// An unsigned token for trust mode.
    fn trust_token(claims: Value) -> String {
        format!(
            "{}.{}.x",
            b64(&serde_json::json!({"alg": "none"})),
            b64(&claims)
        )
    }

    /// A properly signed HS256 token.
    fn signed_token(claims: Value, key: &str) -> String {
        let header = b64(&serde_json::json!({"alg": "HS256", "typ": "JWT"}));
        let payload = b64(&claims);
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{header}.{payload}").as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{payload}.{sig}")
    }

    fn trust_cfg() -> AuthConfig {
        AuthConfig::default()
    }

    fn verify_cfg(key: &str) -> AuthConfig {
        AuthConfig {
            mode: AuthMode::Verify,
            signing_key: Some(key.into()),
            claims_path: "sub".into(),
        }
    }

    #[test]
    fn trust_mode_extracts_sub() {
        let token = trust_token(serde_json::json!({"sub": "user-1"}));
        let outcome = authenticate(&trust_cfg(), Some(&token));
        assert!(outcome.authenticated);
        assert_eq!(outcome.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn trust_mode_ignores_bogus_signature() {
        let token = trust_token(serde_json::json!({"sub": "user-1"}));
        let outcome = authenticate(&trust_cfg(), Some(&token));
        assert!(outcome.authenticated);
    }

    #[test]
    fn missing_token_fails_without_panic() {
        let outcome = authenticate(&trust_cfg(), None);
        assert!(!outcome.authenticated);
        assert!(outcome.error.unwrap().contains("missing"));
    }

    #[test]
    fn two_part_token_is_malformed() {
        let outcome = authenticate(&trust_cfg(), Some("onlyone.part"));
        assert!(!outcome.authenticated);
        assert!(outcome.error.unwrap().contains("malformed"));
    }

    #[test]
    fn garbage_payload_fails_cleanly() {
        let outcome = authenticate(&trust_cfg(), Some("a.%%%%.c"));
        assert!(!outcome.authenticated);
    }

    #[test]
    fn nested_claims_path() {
        let cfg = AuthConfig {
            claims_path: "user.id".into(),
            ..AuthConfig::default()
        };
        let token = trust_token(serde_json::json!({"user": {"id": "deep-7"}}));
        let outcome = authenticate(&cfg, Some(&token));
        assert_eq!(outcome.user_id.as_deref(), Some("deep-7"));
    }

    #[test]
    fn numeric_claim_is_stringified() {
        let token = trust_token(serde_json::json!({"sub": 12345}));
        let outcome = authenticate(&trust_cfg(), Some(&token));
        assert_eq!(outcome.user_id.as_deref(), Some("12345"));
    }

    #[test]
    fn absent_claim_fails() {
        let token = trust_token(serde_json::json!({"other": "x"}));
        let outcome = authenticate(&trust_cfg(), Some(&token));
        assert!(!outcome.authenticated);
    }

    #[test]
    fn verify_mode_accepts_valid_signature() {
        let token = signed_token(serde_json::json!({"sub": "user-1"}), "topsecret");
        let outcome = authenticate(&verify_cfg("topsecret"), Some(&token));
        assert!(outcome.authenticated);
        assert_eq!(outcome.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn verify_mode_rejects_wrong_key() {
        let token = signed_token(serde_json::json!({"sub": "user-1"}), "other-key");
        let outcome = authenticate(&verify_cfg("topsecret"), Some(&token));
        assert!(!outcome.authenticated);
        assert!(outcome.error.unwrap().contains("signature"));
    }

    #[test]
    fn verify_mode_rejects_tampered_payload() {
        let token = signed_token(serde_json::json!({"sub": "user-1"}), "topsecret");
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!(
            "{}.{}.{}",
            parts[0],
            b64(&serde_json::json!({"sub": "admin"})),
            parts[2]
        );
        let outcome = authenticate(&verify_cfg("topsecret"), Some(&tampered));
        assert!(!outcome.authenticated);
    }

    #[test]
    fn verify_mode_rejects_non_hs256() {
        let header = b64(&serde_json::json!({"alg": "RS256"}));
        let payload = b64(&serde_json::json!({"sub": "user-1"}));
        let token = format!("{header}.{payload}.sig");
        let outcome = authenticate(&verify_cfg("topsecret"), Some(&token));
        assert!(!outcome.authenticated);
        assert!(outcome.error.unwrap().contains("unsupported algorithm"));
    }

    #[test]
    fn walk_claims_handles_non_terminal_values() {
        let claims = serde_json::json!({"user": {"roles": ["a", "b"]}});
        assert!(walk_claims(&claims, "user.roles").is_none());
        assert!(walk_claims(&claims, "user.missing").is_none());
    }

    #[test]
    fn header_token_wins_over_query() {
        let req = Request::builder()
            .uri("/agent-api/chat?token=from-query")
            .header("authorization", "Bearer from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&req).as_deref(), Some("from-header"));
    }

    #[test]
    fn query_token_used_when_header_absent() {
        let req = Request::builder()
            .uri("/agent-api/chat?foo=1&token=from-query")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&req).as_deref(), Some("from-query"));
    }
}
