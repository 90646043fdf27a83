//! LDAP support.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope,
    SearchEntry,
};

/// Attribute overwritten by a password change.
pub const PASSWORD_ATTRIBUTE: &str = "userPassword";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The server refused the DN/password pair. Wrong password, unknown DN
    /// and disabled account are indistinguishable here.
    #[error("credentials rejected by the directory")]
    CredentialsRejected,

    #[error("directory protocol error: {0}")]
    Protocol(#[from] LdapError),
}

/// A single session against the directory server.
///
/// Whoever opens one owns it and must call [`DirectoryConn::unbind`] once
/// on every exit path, error paths included.
#[async_trait]
pub trait DirectoryConn: Send {
    /// Authenticate the session as `dn`.
    async fn simple_bind(
        &mut self,
        dn: &str,
        password: &str,
    ) -> Result<(), DirectoryError>;

    /// Subtree search under `base`, returning matching DNs only.
    async fn search_dn(
        &mut self,
        base: &str,
        filter: &str,
    ) -> Result<Vec<String>, DirectoryError>;

    /// Replace the password attribute of `dn`.
    async fn replace_password(
        &mut self,
        dn: &str,
        new_password: &str,
    ) -> Result<(), DirectoryError>;

    /// Release the session.
    async fn unbind(&mut self) -> Result<(), DirectoryError>;
}

/// Opens fresh, unauthenticated directory sessions.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DirectoryConn>, DirectoryError>;
}

/// Production connector over [`ldap3`].
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    url: String,
}

impl Ldap3Connector {
    /// Create a connector for the directory at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self) -> Result<Box<dyn DirectoryConn>, DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);
        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, &self.url).await?;
        ldap3::drive!(conn);

        Ok(Box::new(Ldap3Conn { ldap }))
    }
}

struct Ldap3Conn {
    ldap: Ldap3,
}

#[async_trait]
impl DirectoryConn for Ldap3Conn {
    async fn simple_bind(
        &mut self,
        dn: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        match self
            .ldap
            .with_timeout(OPERATION_TIMEOUT)
            .simple_bind(dn, password)
            .await
        {
            Ok(result) => match result.success() {
                Ok(_) => Ok(()),
                // Any non-zero result code is a rejection, never detailed.
                Err(_) => Err(DirectoryError::CredentialsRejected),
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn search_dn(
        &mut self,
        base: &str,
        filter: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let (entries, _) = self
            .ldap
            .with_timeout(OPERATION_TIMEOUT)
            .search(base, Scope::Subtree, filter, vec!["dn"])
            .await?
            .success()?;

        Ok(entries
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).dn)
            .collect())
    }

    async fn replace_password(
        &mut self,
        dn: &str,
        new_password: &str,
    ) -> Result<(), DirectoryError> {
        let changes =
            vec![Mod::Replace(PASSWORD_ATTRIBUTE, HashSet::from([new_password]))];
        self.ldap
            .with_timeout(OPERATION_TIMEOUT)
            .modify(dn, changes)
            .await?
            .success()?;

        Ok(())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        Ok(self.ldap.unbind().await?)
    }
}

/// Escape filter metacharacters in untrusted input (RFC 4515).
pub fn escape_filter(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
