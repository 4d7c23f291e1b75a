//! LDAP support.
//!
//! Every authentication attempt opens its own [`DirectorySession`]: connect,
//! optional StartTLS, bind as the service account, search, then bind as the
//! user. The user bind consumes the session, so a connection whose identity
//! changed is never reused.

pub mod config;
pub mod filter;

use std::sync::Arc;

use ldap3::{
    DerefAliases, Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError,
    Scope, SearchEntry, SearchOptions,
};
use native_tls::{Certificate, TlsConnector};

pub use config::{ConfigError, DirectoryConfig};
pub use filter::FilterError;

use crate::account::Account;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors raised while talking to the directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("invalid LDAP server address: {0}")]
    Url(#[from] url::ParseError),
    #[error("cannot connect to LDAP server: {0}")]
    Connection(#[source] LdapError),
    #[error("TLS failure with LDAP server: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("cannot render search filter: {0}")]
    FilterRender(#[from] FilterError),
    #[error("search failed: {0}")]
    Search(#[source] LdapError),
    #[error("user doesn't exist")]
    NotFound,
    #[error("user matches {count} entries")]
    Ambiguous { count: usize },
    #[error("cannot bind as user DN: {0}")]
    BindVerification(#[source] LdapError),
    #[error("empty password refused")]
    EmptyPassword,
}

impl DirectoryError {
    /// Sort a connection-time failure between transport and TLS.
    fn connect(err: LdapError) -> Self {
        match err {
            err @ LdapError::NativeTLS { .. } => {
                DirectoryError::Tls(Box::new(err))
            },
            err => DirectoryError::Connection(err),
        }
    }
}

/// Result of a user lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub dn: String,
    pub username: String,
}

/// Handle to the directory, shared by every request.
#[derive(Clone)]
pub struct DirectoryClient {
    config: Arc<DirectoryConfig>,
    url: String,
    connector: Option<TlsConnector>,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("url", &self.url)
            .field("tls", &self.connector.is_some())
            .finish()
    }
}

impl DirectoryClient {
    /// Prepare the client and prove the configuration works.
    ///
    /// Opens one session bound as the service account and closes it. Any
    /// error here means the configuration is unusable.
    pub async fn connect(config: DirectoryConfig) -> Result<Self> {
        let url = config.url()?.to_string();

        let connector = if config.tls.enabled {
            Some(tls_connector(&config)?)
        } else {
            tracing::warn!(
                %url,
                "connecting to LDAP without TLS, credentials and queries are sent in clear text"
            );
            None
        };

        let client = Self {
            config: Arc::new(config),
            url,
            connector,
        };

        client.session().await?.close().await;
        tracing::info!(url = %client.url, "LDAP connected");

        Ok(client)
    }

    /// Open a new connection bound as the service account.
    pub async fn session(&self) -> Result<DirectorySession> {
        let mut settings = LdapConnSettings::new();
        if let Some(connector) = &self.connector {
            settings = settings
                .set_starttls(true)
                .set_no_tls_verify(self.config.tls.skip_cert_verification)
                .set_connector(connector.clone());
        }

        let (handle, mut conn) =
            LdapConnAsync::with_settings(settings, &self.url)
                .await
                .map_err(DirectoryError::connect)?;
        ldap3::drive!(handle);

        conn.simple_bind(&self.config.bind.user_dn, &self.config.bind.password)
            .await
            .and_then(|res| res.success())
            .map_err(DirectoryError::Connection)?;

        Ok(DirectorySession {
            conn,
            config: Arc::clone(&self.config),
        })
    }

    /// Check `username`/`password` against the directory.
    ///
    /// The account is searched in the owner group when `owner` is set, in the
    /// visitor group otherwise.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        owner: bool,
    ) -> Result<Account> {
        let mut session = self.session().await?;

        let outcome = match session.search(username, owner).await {
            Ok(outcome) => outcome,
            Err(err) => {
                session.close().await;
                return Err(err);
            },
        };

        session.verify(&outcome.dn, password).await?;

        Ok(Account::from_directory(outcome.username, owner))
    }
}

/// Build the StartTLS connector.
///
/// Only the configured certificates are trusted. Files that cannot be read or
/// parsed are skipped.
fn tls_connector(config: &DirectoryConfig) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if config.tls.skip_cert_verification {
        tracing::warn!(
            host = %config.host,
            "LDAP server certificate verification is disabled"
        );
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    } else {
        builder.disable_built_in_roots(true);

        let mut trusted = 0;
        for path in &config.tls.trusted_certificates {
            match load_certificate(path) {
                Ok(certificate) => {
                    builder.add_root_certificate(certificate);
                    trusted += 1;
                },
                Err(err) => {
                    tracing::warn!(%path, error = %err, "skipping LDAP certificate")
                },
            }
        }

        if trusted == 0 {
            tracing::warn!(
                host = %config.host,
                "no trusted certificate loaded, TLS handshake will fail"
            );
        }
    }

    builder
        .build()
        .map_err(|err| DirectoryError::Tls(Box::new(err)))
}

fn load_certificate(
    path: &str,
) -> std::result::Result<Certificate, Box<dyn std::error::Error>> {
    let pem = std::fs::read(path)?;
    Ok(Certificate::from_pem(&pem)?)
}

/// Connection bound as the service account.
pub struct DirectorySession {
    conn: Ldap3,
    config: Arc<DirectoryConfig>,
}

impl DirectorySession {
    /// Find the single entry matching `username` in the group selected by
    /// `owner`.
    pub async fn search(
        &mut self,
        username: &str,
        owner: bool,
    ) -> Result<SearchOutcome> {
        let search = &self.config.search;
        let SearchRequest { filter, attributes } =
            SearchRequest::new(search, username, owner)?;

        tracing::debug!(%filter, base = %search.base, "searching LDAP user");

        let (entries, _) = self
            .conn
            .with_search_options(
                SearchOptions::new().deref(DerefAliases::Never),
            )
            .search(&search.base, Scope::Subtree, &filter, attributes)
            .await
            .and_then(|res| res.success())
            .map_err(DirectoryError::Search)?;

        let entries = entries.into_iter().map(SearchEntry::construct).collect();

        resolve(entries, username, search.login_field.as_deref())
    }

    /// Bind as `dn` with `password`, then close the connection.
    pub async fn verify(mut self, dn: &str, password: &str) -> Result<()> {
        if let Err(err) = check_password(password) {
            self.close().await;
            return Err(err);
        }

        let result = self
            .conn
            .simple_bind(dn, password)
            .await
            .and_then(|res| res.success())
            .map(|_| ())
            .map_err(DirectoryError::BindVerification);

        self.close().await;
        result
    }

    /// Unbind and drop the connection.
    pub async fn close(mut self) {
        if let Err(err) = self.conn.unbind().await {
            tracing::debug!(error = %err, "LDAP unbind failed");
        }
    }
}

/// Filter and attributes of a user lookup.
#[derive(Debug, PartialEq, Eq)]
struct SearchRequest<'a> {
    filter: String,
    attributes: Vec<&'a str>,
}

impl<'a> SearchRequest<'a> {
    fn new(
        search: &'a config::SearchConfig,
        username: &str,
        owner: bool,
    ) -> Result<Self> {
        let filter =
            filter::render(&search.filter, username, search.group_dn(owner))?;

        let mut attributes = vec!["dn"];
        if let Some(field) = search.login_field.as_deref() {
            attributes.push(field);
        }

        Ok(Self { filter, attributes })
    }
}

/// An empty simple bind is an anonymous bind, which servers accept.
fn check_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(DirectoryError::EmptyPassword);
    }
    Ok(())
}

/// Pick the identity out of search results.
fn resolve(
    mut entries: Vec<SearchEntry>,
    username: &str,
    login_field: Option<&str>,
) -> Result<SearchOutcome> {
    let entry = match entries.len() {
        0 => return Err(DirectoryError::NotFound),
        1 => entries.remove(0),
        count => return Err(DirectoryError::Ambiguous { count }),
    };

    let resolved = match login_field {
        Some(field) => entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .and_then(|(_, values)| values.first())
            .cloned()
            .unwrap_or_else(|| {
                tracing::warn!(
                    dn = %entry.dn,
                    %field,
                    "login field missing on entry, keeping submitted username"
                );
                username.to_owned()
            }),
        None => username.to_owned(),
    };

    Ok(SearchOutcome {
        dn: entry.dn,
        username: resolved,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn entry(dn: &str, attrs: &[(&str, &str)]) -> SearchEntry {
        SearchEntry {
            dn: dn.into(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
                .collect::<HashMap<_, _>>(),
            bin_attrs: HashMap::new(),
        }
    }

    #[test]
    fn test_resolve_not_found() {
        assert!(matches!(
            resolve(Vec::new(), "alice", None),
            Err(DirectoryError::NotFound)
        ));
    }

    #[test]
    fn test_resolve_ambiguous() {
        let entries = vec![
            entry("uid=alice,ou=users,dc=example,dc=org", &[]),
            entry("uid=alice,ou=staff,dc=example,dc=org", &[]),
        ];

        assert!(matches!(
            resolve(entries, "alice", None),
            Err(DirectoryError::Ambiguous { count: 2 })
        ));
    }

    #[test]
    fn test_resolve_keeps_username() {
        let entries = vec![entry(
            "uid=alice,ou=users,dc=example,dc=org",
            &[("uid", "alice.smith")],
        )];

        assert_eq!(
            resolve(entries, "alice@example.org", None).unwrap(),
            SearchOutcome {
                dn: "uid=alice,ou=users,dc=example,dc=org".into(),
                username: "alice@example.org".into(),
            }
        );
    }

    #[test]
    fn test_resolve_login_field() {
        let entries = vec![entry(
            "cn=Alice Smith,ou=users,dc=example,dc=org",
            &[("sAMAccountName", "asmith")],
        )];

        let outcome =
            resolve(entries, "alice@example.org", Some("samaccountname"))
                .unwrap();
        assert_eq!(outcome.username, "asmith");
        assert_eq!(outcome.dn, "cn=Alice Smith,ou=users,dc=example,dc=org");
    }

    #[test]
    fn test_resolve_missing_login_field() {
        let entries =
            vec![entry("uid=alice,ou=users,dc=example,dc=org", &[])];

        let outcome = resolve(entries, "alice", Some("uid")).unwrap();
        assert_eq!(outcome.username, "alice");
    }

    fn search_config() -> config::SearchConfig {
        config::SearchConfig {
            base: "ou=users,dc=example,dc=org".into(),
            filter: "(&(memberOf={{.Group}})(mail={{.Login}}))".into(),
            owner_group_dn: Some("cn=owners,ou=group,dc=example,dc=org".into()),
            visitor_group_dn: Some(
                "cn=visitors,ou=group,dc=example,dc=org".into(),
            ),
            login_field: Some("uid".into()),
        }
    }

    #[test]
    fn test_search_request_picks_group() {
        let search = search_config();

        let owner = SearchRequest::new(&search, "alice", true).unwrap();
        assert_eq!(
            owner,
            SearchRequest {
                filter: "(&(memberOf=cn=owners,ou=group,dc=example,dc=org)(mail=alice))"
                    .into(),
                attributes: vec!["dn", "uid"],
            }
        );

        let visitor = SearchRequest::new(&search, "alice", false).unwrap();
        assert_eq!(
            visitor.filter,
            "(&(memberOf=cn=visitors,ou=group,dc=example,dc=org)(mail=alice))"
        );
    }

    #[test]
    fn test_search_request_without_optional_fields() {
        let search = config::SearchConfig {
            visitor_group_dn: None,
            login_field: None,
            ..search_config()
        };

        let request = SearchRequest::new(&search, "a*)(uid=*", false).unwrap();
        assert_eq!(request.attributes, vec!["dn"]);
        assert_eq!(
            request.filter,
            "(&(memberOf=)(mail=a\\2a\\29\\28uid=\\2a))"
        );
    }

    #[test]
    fn test_search_request_bad_template() {
        let search = config::SearchConfig {
            filter: "(uid={{.Name}})".into(),
            ..search_config()
        };

        assert!(matches!(
            SearchRequest::new(&search, "alice", false),
            Err(DirectoryError::FilterRender(_))
        ));
    }

    #[test]
    fn test_empty_password_refused() {
        assert!(matches!(
            check_password(""),
            Err(DirectoryError::EmptyPassword)
        ));
        assert!(check_password(" ").is_ok());
    }

    fn tls_config(paths: Vec<String>) -> DirectoryConfig {
        format!(
            r#"version = 1
            host = "ldap.example.org"
            port = 389

            [tls]
            enabled = true
            trustedCertificates = {paths:?}

            [bind]
            userDN = "cn=svcuser,ou=users,dc=example,dc=org"
            password = "PASSWORD"

            [search]
            base = "ou=users,dc=example,dc=org"
            filter = "(uid={{{{.Login}}}})""#
        )
        .parse()
        .unwrap()
    }

    #[test]
    fn test_unusable_certificates_are_skipped() {
        let malformed = std::env::temp_dir().join("shiori-auth-malformed.pem");
        std::fs::write(&malformed, "not a certificate").unwrap();

        let config = tls_config(vec![
            "/nonexistent/ca.pem".into(),
            malformed.to_string_lossy().into_owned(),
        ]);

        assert!(load_certificate("/nonexistent/ca.pem").is_err());
        assert!(load_certificate(&malformed.to_string_lossy()).is_err());
        assert!(tls_connector(&config).is_ok());

        let _ = std::fs::remove_file(malformed);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut config = tls_config(vec!["/nonexistent/ca.pem".into()]);
        config.tls.enabled = false;
        config.host = "127.0.0.1".into();
        config.port = 1;

        assert!(matches!(
            DirectoryClient::connect(config).await,
            Err(DirectoryError::Connection(_))
        ));
    }
}
