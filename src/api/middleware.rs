//! API Middleware
//!
//! Session authentication, CSRF origin checks and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::domain::OperationContext;

use super::AppState;

/// Authenticated session resolved by the auth middleware
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: Uuid,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "success": false,
            "error": { "message": message, "kind": "unauthorized" }
        })),
    )
        .into_response()
}

/// Whether `origin` is covered by the trusted list. Entries may carry a
/// wildcard subdomain prefix (`https://*.example.com`), which also covers
/// the apex domain.
pub fn origin_trusted(origin: &str, trusted: &[String]) -> bool {
    trusted.iter().any(|pattern| {
        if let Some((scheme, rest)) = pattern.split_once("://") {
            if let Some(domain) = rest.strip_prefix("*.") {
                return match origin.split_once("://") {
                    Some((origin_scheme, origin_host)) => {
                        origin_scheme == scheme
                            && (origin_host == domain
                                || origin_host
                                    .strip_suffix(domain)
                                    .is_some_and(|prefix| prefix.ends_with('.')))
                    }
                    None => false,
                };
            }
        }
        pattern == origin
    })
}

/// Validate the session token and build the operation context.
///
/// Tokens arrive as `Authorization: Bearer <token>` (or a `session_token`
/// cookie) and are matched by hash against the sessions table. CSRF is
/// enforced by requiring any present `Origin` header to match the trusted
/// origins list.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    // CSRF: browsers always send Origin on cross-site POSTs
    if let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) {
        if !origin_trusted(origin, &state.config.auth_trusted_origins) {
            return Err(unauthorized("Origin not trusted"));
        }
    }

    let Some(token) = extract_session_token(&headers) else {
        return Err(unauthorized("Missing session token"));
    };

    let token_hash = hash_token(&token, &state.config.auth_secret);

    let session: Option<(Uuid, chrono::DateTime<chrono::Utc>)> = match sqlx::query_as(
        r#"
        SELECT user_id, expires_at FROM sessions WHERE token_hash = $1
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&state.pool)
    .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Session lookup failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": { "message": "Internal server error", "kind": "internal" }
                })),
            )
                .into_response());
        }
    };

    let Some((user_id, expires_at)) = session else {
        return Err(unauthorized("Invalid session token"));
    };
    if expires_at <= chrono::Utc::now() {
        return Err(unauthorized("Session expired"));
    }

    // Correlation id: propagate the caller's or mint one
    let correlation_id = headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new()
        .with_user(user_id)
        .with_correlation_id(correlation_id);

    // Client IP, optionally from a proxy header named in the config
    if let Some(header) = &state.config.auth_ip_header {
        if let Some(ip) = headers
            .get(header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
        {
            context = context.with_client_ip(ip);
        }
    }

    request.extensions_mut().insert(SessionUser { user_id });
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                let (name, value) = cookie.trim().split_once('=')?;
                (name == "session_token").then(|| value.to_string())
            })
        })
}

/// Hash a session token with the server secret
fn hash_token(token: &str, secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted() -> Vec<String> {
        vec![
            "https://admin.example.com".to_string(),
            "https://*.shop.example.com".to_string(),
        ]
    }

    #[test]
    fn test_exact_origin_match() {
        assert!(origin_trusted("https://admin.example.com", &trusted()));
        assert!(!origin_trusted("https://evil.example.com", &trusted()));
        assert!(!origin_trusted("http://admin.example.com", &trusted()));
    }

    #[test]
    fn test_wildcard_origin_match() {
        assert!(origin_trusted("https://eu.shop.example.com", &trusted()));
        assert!(origin_trusted("https://a.b.shop.example.com", &trusted()));
        // Apex is covered by the wildcard
        assert!(origin_trusted("https://shop.example.com", &trusted()));
        // Scheme must match
        assert!(!origin_trusted("http://eu.shop.example.com", &trusted()));
        // Suffix tricks must not match
        assert!(!origin_trusted("https://evilshop.example.com", &trusted()));
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok_123".parse().unwrap());
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok_123"));
    }

    #[test]
    fn test_extract_cookie_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            "theme=dark; session_token=tok_456; lang=en".parse().unwrap(),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok_456"));
    }

    #[test]
    fn test_extract_token_missing() {
        let headers = HeaderMap::new();
        assert!(extract_session_token(&headers).is_none());
    }

    #[test]
    fn test_hash_token_uses_secret() {
        let a = hash_token("tok", "secret-a");
        let b = hash_token("tok", "secret-b");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("cookie", "session_token=secret".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);
        let get = |name: &str| {
            masked
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("authorization"), Some("[REDACTED]"));
        assert_eq!(get("cookie"), Some("[REDACTED]"));
        assert_eq!(get("content-type"), Some("application/json"));
    }
}
