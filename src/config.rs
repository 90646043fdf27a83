//! Configuration manager for ldappass.

use std::fmt;

use url::Url;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_URL: &str = "ldap://localhost:389";
const DEFAULT_BASE_DN: &str = "dc=example,dc=com";
const DEFAULT_ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
const DEFAULT_USER_SEARCH_BASE: &str = "ou=users,dc=example,dc=com";
const DEFAULT_USER_SEARCH_FILTER: &str = "(uid={username})";

/// Placeholder substituted with the (escaped) username in
/// [`Ldap::user_search_filter`].
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Errors that may occur during the configuration loading process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("LDAP_URL is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported directory scheme: {0}")]
    Scheme(String),
    #[error("LDAP_USER_SEARCH_FILTER must contain the `{{username}}` placeholder")]
    Filter,
    #[error("PORT is not a valid port number: {0}")]
    Port(#[from] std::num::ParseIntError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Port the HTTP API listens on.
    pub port: u16,
    /// Related to LDAP3 configuration.
    pub ldap: Ldap,
}

/// LDAP configuration.
#[derive(Default, Clone, PartialEq)]
pub struct Ldap {
    /// scheme://hostname:(?port) for LDAP instance.
    pub url: String,
    /// DN for domain.
    pub base_dn: String,
    /// Service account DN used to search and modify entries.
    pub admin_dn: String,
    /// Service account password.
    pub admin_password: String,
    /// Subtree searched for user entries.
    pub user_search_base: String,
    /// Filter template; `{username}` is substituted per request.
    pub user_search_filter: String,
}

impl fmt::Debug for Ldap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ldap")
            .field("url", &self.url)
            .field("base_dn", &self.base_dn)
            .field("admin_dn", &self.admin_dn)
            .field("admin_password", &"<redacted>")
            .field("user_search_base", &self.user_search_base)
            .field("user_search_filter", &self.user_search_filter)
            .finish()
    }
}

impl Configuration {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let port = match var("PORT") {
            Some(port) => port.parse()?,
            None => DEFAULT_PORT,
        };

        let ldap = Ldap {
            url: var("LDAP_URL").unwrap_or_else(|| DEFAULT_URL.into()),
            base_dn: var("LDAP_BASE_DN").unwrap_or_else(|| DEFAULT_BASE_DN.into()),
            admin_dn: var("LDAP_ADMIN_DN").unwrap_or_else(|| DEFAULT_ADMIN_DN.into()),
            admin_password: var("LDAP_ADMIN_PASSWORD").unwrap_or_default(),
            user_search_base: var("LDAP_USER_SEARCH_BASE")
                .unwrap_or_else(|| DEFAULT_USER_SEARCH_BASE.into()),
            user_search_filter: var("LDAP_USER_SEARCH_FILTER")
                .unwrap_or_else(|| DEFAULT_USER_SEARCH_FILTER.into()),
        };

        let url = Url::parse(&ldap.url)?;
        if !matches!(url.scheme(), "ldap" | "ldaps" | "ldapi") {
            return Err(Error::Scheme(url.scheme().to_owned()));
        }

        if !ldap.user_search_filter.contains(USERNAME_PLACEHOLDER) {
            return Err(Error::Filter);
        }

        if ldap.admin_password.is_empty() {
            tracing::warn!(
                "LDAP_ADMIN_PASSWORD is empty; the service account will not be able to modify entries"
            );
        }

        Ok(Self { port, ldap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(
        pairs: &'a [(&'a str, &'a str)],
    ) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[test]
    fn defaults_match_documented_environment() {
        let config = Configuration::from_vars(|_| None).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.ldap.url, "ldap://localhost:389");
        assert_eq!(config.ldap.base_dn, "dc=example,dc=com");
        assert_eq!(config.ldap.admin_dn, "cn=admin,dc=example,dc=com");
        assert_eq!(config.ldap.admin_password, "");
        assert_eq!(config.ldap.user_search_base, "ou=users,dc=example,dc=com");
        assert_eq!(config.ldap.user_search_filter, "(uid={username})");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Configuration::from_vars(vars(&[
            ("PORT", "8080"),
            ("LDAP_URL", "ldaps://directory.internal:636"),
            ("LDAP_ADMIN_PASSWORD", "hunter2hunter2"),
            ("LDAP_USER_SEARCH_FILTER", "(sAMAccountName={username})"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.ldap.url, "ldaps://directory.internal:636");
        assert_eq!(config.ldap.admin_password, "hunter2hunter2");
        assert_eq!(
            config.ldap.user_search_filter,
            "(sAMAccountName={username})"
        );
    }

    #[test]
    fn filter_template_requires_placeholder() {
        let err = Configuration::from_vars(vars(&[(
            "LDAP_USER_SEARCH_FILTER",
            "(uid=alice)",
        )]))
        .unwrap_err();

        assert!(matches!(err, Error::Filter));
    }

    #[test]
    fn non_directory_scheme_is_rejected() {
        let err =
            Configuration::from_vars(vars(&[("LDAP_URL", "http://example.com")]))
                .unwrap_err();

        assert!(matches!(err, Error::Scheme(scheme) if scheme == "http"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = Configuration::from_vars(vars(&[("PORT", "directory")]))
            .unwrap_err();

        assert!(matches!(err, Error::Port(_)));
    }

    #[test]
    fn secrets_are_redacted_from_debug_output() {
        let config = Configuration::from_vars(vars(&[(
            "LDAP_ADMIN_PASSWORD",
            "hunter2hunter2",
        )]))
        .unwrap();

        let rendered = format!("{:?}", config.ldap);
        assert!(!rendered.contains("hunter2hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
