//! Credential resolution.
//!
//! Credentials set in the config document always win. A host missing one
//! or both fields gets them from the secret store, one read per call; the
//! document is not cached across hosts.
//!
//! The secret document has a single accepted shape:
//!
//! ```yaml
//! hosts:
//!   - hostname: node1.lab.example
//!     ipmi:
//!       username: admin
//!       password: hunter2
//! ```
//!
//! The older flat shape (`host:` list with top-level `username`/`password`)
//! is rejected because it has no `hosts` key.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{HostConfig, VaultConfig};
use crate::error::{CredentialIssue, PowerError};
use crate::retry::{retry_async, RetryPolicy};
use crate::secrets::{SecretDocument, SecretStore};

/// A resolved username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl Credentials {
    /// Create a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host entry of a validated secret document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretHostEntry {
    hostname: String,
    credentials: Credentials,
}

/// Validate the whole document and return its host entries.
fn parse_secret_document(doc: &SecretDocument) -> Result<Vec<SecretHostEntry>, CredentialIssue> {
    let hosts = required(doc, "hosts", "top level")?;
    let hosts = hosts.as_array().ok_or_else(|| wrong_type("hosts", "top level", "a list"))?;

    hosts
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let location = format!("hosts[{index}]");
            let host = raw
                .as_object()
                .ok_or_else(|| wrong_type("host", &location, "a map"))?;
            let hostname = string_field(host, "hostname", &location)?;

            let ipmi_location = format!("{location}.ipmi");
            let ipmi = required(host, "ipmi", &location)?
                .as_object()
                .ok_or_else(|| wrong_type("ipmi", &location, "a map"))?;

            Ok(SecretHostEntry {
                hostname,
                credentials: Credentials {
                    username: string_field(ipmi, "username", &ipmi_location)?,
                    password: string_field(ipmi, "password", &ipmi_location)?,
                },
            })
        })
        .collect()
}

fn required<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    location: &str,
) -> Result<&'a Value, CredentialIssue> {
    map.get(key).ok_or_else(|| CredentialIssue::MissingKey {
        key: key.to_string(),
        location: location.to_string(),
    })
}

fn string_field(
    map: &Map<String, Value>,
    key: &str,
    location: &str,
) -> Result<String, CredentialIssue> {
    required(map, key, location)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(key, location, "a string"))
}

fn wrong_type(key: &str, location: &str, expected: &'static str) -> CredentialIssue {
    CredentialIssue::WrongType {
        key: key.to_string(),
        location: location.to_string(),
        expected,
    }
}

/// Source label for fields taken from the config document.
pub(crate) const CONFIG_SOURCE: &str = "configuration";

fn source_of(configured: bool, secret_path: &str) -> &str {
    if configured {
        CONFIG_SOURCE
    } else {
        secret_path
    }
}

/// Reject empty fields, naming the source each field came from.
fn non_empty(
    credentials: &Credentials,
    hostname: &str,
    username_source: &str,
    password_source: &str,
) -> Result<(), PowerError> {
    for (field, value, source) in [
        ("username", &credentials.username, username_source),
        ("password", &credentials.password, password_source),
    ] {
        if value.is_empty() {
            return Err(PowerError::CredentialResolution {
                path: source.to_string(),
                issue: CredentialIssue::EmptyField {
                    hostname: hostname.to_string(),
                    field,
                },
            });
        }
    }
    Ok(())
}

/// Merges config credentials with secret-store lookups, per field.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
    /// Configured path, used to annotate errors.
    secret_path: String,
    mount_path: String,
    secret_name: String,
    retry: RetryPolicy,
}

impl CredentialResolver {
    /// Create a resolver reading from `store` at `vault.path`.
    ///
    /// # Errors
    /// Returns [`PowerError::Config`] if `vault.path` has no mount/secret split.
    pub fn new(
        store: Arc<dyn SecretStore>,
        vault: &VaultConfig,
        retry: RetryPolicy,
    ) -> Result<Self, PowerError> {
        let (mount_path, secret_name) = vault.split_path()?;
        Ok(Self {
            store,
            secret_path: vault.path.clone(),
            mount_path,
            secret_name,
            retry,
        })
    }

    /// Final credentials for `hostname`.
    ///
    /// Returns config credentials untouched when both are set; otherwise
    /// reads the secret store and fills only the missing fields.
    ///
    /// # Errors
    /// Returns [`PowerError::SecretStore`] when every read attempt fails and
    /// [`PowerError::CredentialResolution`] when the document has no usable
    /// entry for the host or a resolved field is empty. Empty fields are
    /// reported against the source they came from.
    pub async fn resolve(
        &self,
        overrides: &HostConfig,
        hostname: &str,
    ) -> Result<Credentials, PowerError> {
        if overrides.has_credentials() {
            debug!(hostname = %hostname, "Using credentials from configuration");
            let credentials = Credentials::new(
                overrides.username.clone().unwrap_or_default(),
                overrides.password.clone().unwrap_or_default(),
            );
            non_empty(&credentials, hostname, CONFIG_SOURCE, CONFIG_SOURCE)?;
            return Ok(credentials);
        }

        let stored = self.lookup(hostname).await?;
        let username_source = source_of(overrides.username.is_some(), &self.secret_path);
        let password_source = source_of(overrides.password.is_some(), &self.secret_path);
        let credentials = Credentials {
            username: overrides.username.clone().unwrap_or(stored.username),
            password: overrides.password.clone().unwrap_or(stored.password),
        };
        non_empty(&credentials, hostname, username_source, password_source)?;
        Ok(credentials)
    }

    /// Credentials stored for `hostname`, matched exactly.
    ///
    /// # Errors
    /// Same as [`Self::resolve`].
    pub async fn lookup(&self, hostname: &str) -> Result<Credentials, PowerError> {
        info!(
            hostname = %hostname,
            path = %self.secret_path,
            "Reading credentials from secret store"
        );

        let doc = retry_async(&self.retry, "secret read", || {
            self.store.read(&self.mount_path, &self.secret_name)
        })
        .await
        .map_err(|source| PowerError::SecretStore {
            path: self.secret_path.clone(),
            source,
        })?;

        let entries = parse_secret_document(&doc).map_err(|issue| self.issue(issue))?;
        entries
            .into_iter()
            .find(|entry| entry.hostname == hostname)
            .map(|entry| entry.credentials)
            .ok_or_else(|| {
                self.issue(CredentialIssue::HostNotFound {
                    hostname: hostname.to_string(),
                })
            })
    }

    fn issue(&self, issue: CredentialIssue) -> PowerError {
        PowerError::CredentialResolution {
            path: self.secret_path.clone(),
            issue,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::SecretStoreError;
    use crate::secrets::StaticSecretStore;

    fn document(value: &Value) -> SecretDocument {
        value.as_object().cloned().unwrap()
    }

    fn lab_document() -> SecretDocument {
        document(&json!({
            "hosts": [
                {"hostname": "node1.lab", "ipmi": {"username": "vault-user", "password": "vault-pass"}},
                {"hostname": "node2.lab", "ipmi": {"username": "admin2", "password": "pass2"}}
            ]
        }))
    }

    fn vault_config() -> VaultConfig {
        VaultConfig {
            hostname: "https://vault".to_string(),
            path: "secret/lab/ipmi".to_string(),
            token: None,
        }
    }

    fn resolver(store: StaticSecretStore) -> (Arc<StaticSecretStore>, CredentialResolver) {
        let store = Arc::new(store);
        let resolver =
            CredentialResolver::new(store.clone(), &vault_config(), RetryPolicy::fixed(3)).unwrap();
        (store, resolver)
    }

    fn overrides(username: Option<&str>, password: Option<&str>) -> HostConfig {
        HostConfig {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            ..HostConfig::default()
        }
    }

    #[tokio::test]
    async fn test_config_credentials_skip_secret_store() {
        let (store, resolver) = resolver(StaticSecretStore::new());

        let creds = resolver
            .resolve(&overrides(Some("cfg-user"), Some("cfg-pass")), "node1.lab")
            .await
            .unwrap();

        assert_eq!(creds, Credentials::new("cfg-user", "cfg-pass"));
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_filled_from_secret_store() {
        let (store, resolver) = resolver(
            StaticSecretStore::new().with_document("secret/lab", "ipmi", lab_document()),
        );

        let creds = resolver
            .resolve(&overrides(Some("cfg-user"), None), "node1.lab")
            .await
            .unwrap();
        assert_eq!(creds, Credentials::new("cfg-user", "vault-pass"));

        let creds = resolver
            .resolve(&overrides(None, Some("cfg-pass")), "node1.lab")
            .await
            .unwrap();
        assert_eq!(creds, Credentials::new("vault-user", "cfg-pass"));

        let creds = resolver
            .resolve(&HostConfig::default(), "node2.lab")
            .await
            .unwrap();
        assert_eq!(creds, Credentials::new("admin2", "pass2"));

        // One read per resolution, nothing cached.
        assert_eq!(store.reads(), 3);
    }

    #[tokio::test]
    async fn test_hostname_match_is_exact() {
        let (_, resolver) = resolver(
            StaticSecretStore::new().with_document("secret/lab", "ipmi", lab_document()),
        );

        let err = resolver
            .resolve(&HostConfig::default(), "node1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PowerError::CredentialResolution {
                issue: CredentialIssue::HostNotFound { ref hostname },
                ref path,
            } if hostname == "node1" && path == "secret/lab/ipmi"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retried_then_succeeds() {
        let (store, resolver) = resolver(
            StaticSecretStore::new()
                .with_document("secret/lab", "ipmi", lab_document())
                .with_failure(SecretStoreError::Api {
                    status: 503,
                    message: "sealed".into(),
                }),
        );

        let creds = resolver
            .resolve(&HostConfig::default(), "node1.lab")
            .await
            .unwrap();
        assert_eq!(creds.username, "vault-user");
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exhaustion_surfaces_last_error() {
        let (store, resolver) = resolver(
            StaticSecretStore::new()
                .with_failure(SecretStoreError::Api {
                    status: 503,
                    message: "sealed".into(),
                })
                .with_failure(SecretStoreError::Api {
                    status: 503,
                    message: "sealed".into(),
                })
                .with_failure(SecretStoreError::Auth("token expired".into())),
        );

        let err = resolver
            .resolve(&HostConfig::default(), "node1.lab")
            .await
            .unwrap_err();
        assert_eq!(store.reads(), 3);
        assert!(matches!(
            err,
            PowerError::SecretStore {
                source: SecretStoreError::Auth(_),
                ref path,
            } if path == "secret/lab/ipmi"
        ));
    }

    #[tokio::test]
    async fn test_empty_field_names_its_source() {
        let doc = document(&json!({
            "hosts": [{"hostname": "node3.lab", "ipmi": {"username": "vault-user", "password": ""}}]
        }));
        let (_, resolver) =
            resolver(StaticSecretStore::new().with_document("secret/lab", "ipmi", doc));

        let err = resolver
            .resolve(&overrides(Some("cfg-user"), None), "node3.lab")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PowerError::CredentialResolution {
                issue: CredentialIssue::EmptyField { field: "password", .. },
                ref path,
            } if path == "secret/lab/ipmi"
        ));

        let err = resolver
            .resolve(&overrides(Some(""), None), "node3.lab")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PowerError::CredentialResolution {
                issue: CredentialIssue::EmptyField { field: "username", .. },
                ref path,
            } if path == "configuration"
        ));
    }

    #[test]
    fn test_document_shape_errors_are_distinct() {
        let cases = [
            (json!({"host": []}), "'hosts' key not found at top level"),
            (json!({"hosts": {"a": 1}}), "'hosts' at top level is not a list"),
            (json!({"hosts": ["node1"]}), "'host' at hosts[0] is not a map"),
            (json!({"hosts": [{"ipmi": {}}]}), "'hostname' key not found at hosts[0]"),
            (json!({"hosts": [{"hostname": 7}]}), "'hostname' at hosts[0] is not a string"),
            (json!({"hosts": [{"hostname": "a"}]}), "'ipmi' key not found at hosts[0]"),
            (
                json!({"hosts": [{"hostname": "a", "ipmi": "x"}]}),
                "'ipmi' at hosts[0] is not a map",
            ),
            (
                json!({"hosts": [{"hostname": "a", "ipmi": {"password": "p"}}]}),
                "'username' key not found at hosts[0].ipmi",
            ),
            (
                json!({"hosts": [{"hostname": "a", "ipmi": {"username": "u", "password": 1}}]}),
                "'password' at hosts[0].ipmi is not a string",
            ),
        ];

        for (value, expected) in cases {
            let issue = parse_secret_document(&document(&value)).unwrap_err();
            assert_eq!(issue.to_string(), expected);
        }
    }

    #[test]
    fn test_flat_shape_rejected() {
        let flat = document(&json!({
            "host": [{"hostname": "node1.lab", "username": "u", "password": "p"}]
        }));
        assert!(matches!(
            parse_secret_document(&flat),
            Err(CredentialIssue::MissingKey { ref key, .. }) if key == "hosts"
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
