//! Password change workflow.
//!
//! One privileged service connection for the whole sequence, plus one
//! throwaway connection for verifying the caller's current password.
//! Re-binding the service connection as the user would discard its
//! privileged authentication state, so verification never reuses it.

use std::fmt;

use thiserror::Error;

use crate::config;
use crate::config::USERNAME_PLACEHOLDER;
use crate::ldap::{
    DirectoryConn, DirectoryConnector, DirectoryError, escape_filter,
};

/// A validated password change order.
pub struct ChangeRequest {
    pub username: String,
    pub current_password: String,
    pub new_password: String,
}

impl fmt::Debug for ChangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRequest")
            .field("username", &self.username)
            .field("current_password", &"<redacted>")
            .field("new_password", &"<redacted>")
            .finish()
    }
}

/// Terminal failures of the change workflow.
#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("user does not exist")]
    UserNotFound,

    #[error("current password incorrect")]
    InvalidCredentials,

    #[error("search filter matched more than one entry")]
    AmbiguousUser,

    #[error("password change failed")]
    Directory(#[source] DirectoryError),
}

impl ChangeError {
    fn outcome(&self) -> &'static str {
        match self {
            Self::UserNotFound => "user_not_found",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AmbiguousUser | Self::Directory(_) => "directory_fault",
        }
    }
}

/// Change `request.username`'s directory password.
///
/// Binds a dedicated connection as the service account, resolves the
/// user's DN through it, verifies the current password on an independent
/// connection, then replaces the password attribute over the service
/// connection. The service connection is released exactly once, whatever
/// the outcome.
pub async fn change_password(
    directory: &dyn DirectoryConnector,
    config: &config::Ldap,
    request: &ChangeRequest,
) -> Result<(), ChangeError> {
    let result = run_change(directory, config, request).await;

    let outcome = match &result {
        Ok(()) => "success",
        Err(err) => err.outcome(),
    };
    let labels = [("outcome", outcome.to_owned())];
    metrics::counter!("password_changes_total", &labels).increment(1);

    result
}

async fn run_change(
    directory: &dyn DirectoryConnector,
    config: &config::Ldap,
    request: &ChangeRequest,
) -> Result<(), ChangeError> {
    let mut service =
        directory.connect().await.map_err(ChangeError::Directory)?;
    let result =
        run_on_service(directory, config, request, service.as_mut()).await;

    // Unconditional release; a failed unbind never overrides the outcome.
    if let Err(err) = service.unbind().await {
        tracing::warn!(error = %err, "failed to release service connection");
    }

    result
}

async fn run_on_service(
    directory: &dyn DirectoryConnector,
    config: &config::Ldap,
    request: &ChangeRequest,
    service: &mut dyn DirectoryConn,
) -> Result<(), ChangeError> {
    service
        .simple_bind(&config.admin_dn, &config.admin_password)
        .await
        .map_err(|err| {
            // Misconfiguration or outage, never the caller's fault.
            tracing::error!(error = %err, "service account bind failed");
            ChangeError::Directory(err)
        })?;

    let dn = resolve_user_dn(
        service,
        &config.user_search_base,
        &config.user_search_filter,
        &request.username,
    )
    .await?
    .ok_or(ChangeError::UserNotFound)?;

    tracing::debug!(username = %request.username, %dn, "resolved directory entry");

    let verified = verify_password(directory, &dn, &request.current_password)
        .await
        .map_err(ChangeError::Directory)?;
    if !verified {
        return Err(ChangeError::InvalidCredentials);
    }

    service
        .replace_password(&dn, &request.new_password)
        .await
        .map_err(ChangeError::Directory)?;

    tracing::info!(username = %request.username, "password changed");
    Ok(())
}

/// Locate the unique DN matching `username`, or `None`.
///
/// Every `{username}` occurrence in the template is replaced with the
/// escaped username.
async fn resolve_user_dn(
    conn: &mut dyn DirectoryConn,
    search_base: &str,
    filter_template: &str,
    username: &str,
) -> Result<Option<String>, ChangeError> {
    let filter =
        filter_template.replace(USERNAME_PLACEHOLDER, &escape_filter(username));

    let mut dns = conn
        .search_dn(search_base, &filter)
        .await
        .map_err(ChangeError::Directory)?;

    match dns.len() {
        0 => Ok(None),
        1 => Ok(Some(dns.remove(0))),
        matched => {
            tracing::error!(%username, matched, "filter matched more than one entry");
            Err(ChangeError::AmbiguousUser)
        },
    }
}

/// Check `password` against `dn` with a bind on a fresh connection.
///
/// A rejected bind is an expected outcome, not a fault; only transport
/// failures propagate as errors. The connection is released in all cases.
async fn verify_password(
    directory: &dyn DirectoryConnector,
    dn: &str,
    password: &str,
) -> Result<bool, DirectoryError> {
    let mut conn = directory.connect().await?;

    let outcome = match conn.simple_bind(dn, password).await {
        Ok(()) => Ok(true),
        Err(DirectoryError::CredentialsRejected) => Ok(false),
        Err(err) => Err(err),
    };

    if let Err(err) = conn.unbind().await {
        tracing::warn!(error = %err, "failed to release verification connection");
    }

    outcome
}
