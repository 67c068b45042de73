//! Gateway authentication: bearer token or API key, resolved to a tenant.
//!
//! Keys are shape-validated with a regex before touching the database, and
//! the store compares hashes in constant time.

use std::sync::LazyLock;

use {axum::http::HeaderMap, regex::Regex};

use {relay_common::TenantId, relay_vault::CredentialStore};

/// Accepted API key shape: `rk_` plus url-safe base64, as issued.
static API_KEY_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // a const pattern that cannot fail to parse
    Regex::new(r"^rk_[A-Za-z0-9_-]{40,48}$").expect("valid regex")
});

/// Pull a candidate key out of the upgrade request.
///
/// `Authorization: Bearer <key>` is preferred; the `api_key` query parameter
/// exists for clients that cannot set headers on WebSocket upgrades.
#[must_use]
pub fn extract_api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(auth) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(token) = auth.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }

    let query = query?;
    query.split('&').find_map(|pair| {
        pair.strip_prefix("api_key=")
            .map(|value| value.trim().to_string())
    })
}

/// Validate shape, then verify against the store. `None` means reject.
pub async fn authenticate(
    store: &CredentialStore,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Option<TenantId> {
    let key = extract_api_key(headers, query)?;
    if !API_KEY_SHAPE.is_match(&key) {
        return None;
    }
    store.verify_api_key(&key).await.ok().flatten()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer rk_abc".parse().unwrap(),
        );
        let key = extract_api_key(&headers, Some("api_key=rk_other")).unwrap();
        assert_eq!(key, "rk_abc");
    }

    #[test]
    fn query_parameter_is_a_fallback() {
        let headers = HeaderMap::new();
        let key = extract_api_key(&headers, Some("foo=1&api_key=rk_xyz")).unwrap();
        assert_eq!(key, "rk_xyz");
        assert!(extract_api_key(&headers, Some("foo=1")).is_none());
        assert!(extract_api_key(&headers, None).is_none());
    }

    #[test]
    fn key_shape_regex_matches_issued_keys() {
        // Issued keys are rk_ + 43 chars of url-safe base64.
        let issued = format!("rk_{}", "A".repeat(43));
        assert!(API_KEY_SHAPE.is_match(&issued));
        assert!(!API_KEY_SHAPE.is_match("rk_short"));
        assert!(!API_KEY_SHAPE.is_match("pk_wrongprefix_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!API_KEY_SHAPE.is_match(&format!("rk_{}", "A".repeat(43) + "!")));
    }
}
