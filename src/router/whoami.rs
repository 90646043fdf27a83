//! Identity pre-fill for the password form.

use axum::Json;
use axum::http::HeaderMap;

use crate::middleware::{RemoteIdentity, remote_identity};

/// Report the identity forwarded by the upstream proxy, if any.
pub async fn handler(headers: HeaderMap) -> Json<RemoteIdentity> {
    Json(remote_identity(&headers))
}
