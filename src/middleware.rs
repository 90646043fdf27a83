//! Middlewares for routes.

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;

const REMOTE_USER: [&str; 2] = ["remote-user", "remote_user"];
const REMOTE_EMAIL: [&str; 2] = ["remote-email", "remote_email"];

/// Identity forwarded by an upstream reverse proxy, used to pre-fill the
/// form. Never an authentication source.
#[derive(Debug, Default, Serialize)]
pub struct RemoteIdentity {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl RemoteIdentity {
    pub fn is_present(&self) -> bool {
        self.username.is_some() || self.email.is_some()
    }
}

/// Read the identity-proxy headers, accepting hyphen and underscore
/// variants. Name matching is case-insensitive.
pub fn remote_identity(headers: &HeaderMap) -> RemoteIdentity {
    RemoteIdentity {
        username: first_header(headers, &REMOTE_USER),
        email: first_header(headers, &REMOTE_EMAIL),
    }
}

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Log requests forwarded by an identity proxy.
pub async fn identify(req: Request, next: Next) -> Response {
    let identity = remote_identity(req.headers());
    if identity.is_present() {
        tracing::debug!(
            username = identity.username.as_deref().unwrap_or("-"),
            email = identity.email.as_deref().unwrap_or("-"),
            "request forwarded by identity proxy"
        );
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn reads_hyphen_and_underscore_variants() {
        let mut headers = HeaderMap::new();
        headers.insert("remote-user", HeaderValue::from_static("alice"));
        headers.insert(
            "remote_email",
            HeaderValue::from_static("alice@example.com"),
        );

        let identity = remote_identity(&headers);
        assert_eq!(identity.username.as_deref(), Some("alice"));
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn hyphen_variant_wins_over_underscore() {
        let mut headers = HeaderMap::new();
        headers.insert("remote-user", HeaderValue::from_static("alice"));
        headers.insert("remote_user", HeaderValue::from_static("bob"));

        let identity = remote_identity(&headers);
        assert_eq!(identity.username.as_deref(), Some("alice"));
    }

    #[test]
    fn absent_headers_yield_empty_identity() {
        let identity = remote_identity(&HeaderMap::new());
        assert!(!identity.is_present());
        assert!(identity.username.is_none());
        assert!(identity.email.is_none());
    }
}
