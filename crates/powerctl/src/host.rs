//! Per-host connection descriptors.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigDocument, HostConfig, DEFAULT_IPMI_PORT};
use crate::credentials::{CredentialResolver, Credentials, CONFIG_SOURCE};
use crate::error::{CredentialIssue, PowerError};

/// Everything needed to open a management session for one host.
///
/// Username and password are non-empty by construction.
#[derive(Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    /// Hostname as requested (after config matching).
    pub hostname: String,
    /// Management controller address.
    pub ip: String,
    /// Management controller port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDescriptor")
            .field("hostname", &self.hostname)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl HostDescriptor {
    /// Build a descriptor from config overrides and resolved credentials.
    ///
    /// The controller address is `ipmi.ip`, then `ipmi.hostname`, then the
    /// hostname itself. The port defaults to 623.
    ///
    /// # Errors
    /// Returns [`PowerError::CredentialResolution`] if a credential is empty.
    /// Credentials handed in directly count as configuration.
    pub fn build(
        hostname: &str,
        overrides: &HostConfig,
        credentials: Credentials,
    ) -> Result<Self, PowerError> {
        for (field, value) in [
            ("username", &credentials.username),
            ("password", &credentials.password),
        ] {
            if value.is_empty() {
                return Err(PowerError::CredentialResolution {
                    path: CONFIG_SOURCE.to_string(),
                    issue: CredentialIssue::EmptyField {
                        hostname: hostname.to_string(),
                        field,
                    },
                });
            }
        }

        let ip = overrides
            .ip
            .as_deref()
            .or(overrides.hostname.as_deref())
            .unwrap_or(hostname)
            .to_string();

        Ok(Self {
            hostname: hostname.to_string(),
            ip,
            port: overrides.port.unwrap_or(DEFAULT_IPMI_PORT),
            username: credentials.username,
            password: credentials.password,
        })
    }
}

/// Builds descriptors for hosts of a loaded config document.
#[derive(Clone)]
pub struct HostDescriber {
    config: Arc<ConfigDocument>,
    resolver: CredentialResolver,
}

impl HostDescriber {
    /// Create a describer over `config`, resolving missing credentials with `resolver`.
    #[must_use]
    pub fn new(config: &ConfigDocument, resolver: CredentialResolver) -> Self {
        Self {
            config: Arc::new(config.clone()),
            resolver,
        }
    }

    /// Resolve credentials and build the descriptor for `hostname`.
    ///
    /// # Errors
    /// Propagates credential resolution failures.
    pub async fn describe(&self, hostname: &str) -> Result<HostDescriptor, PowerError> {
        let overrides = self
            .config
            .host_config(hostname)
            .cloned()
            .unwrap_or_default();
        let credentials = self.resolver.resolve(&overrides, hostname).await?;
        let descriptor = HostDescriptor::build(hostname, &overrides, credentials)?;

        debug!(
            hostname = %descriptor.hostname,
            ip = %descriptor.ip,
            port = descriptor.port,
            "Built host descriptor"
        );
        Ok(descriptor)
    }
}
