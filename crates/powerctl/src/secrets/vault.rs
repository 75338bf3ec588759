//! HTTP client for a Vault/OpenBao KV version 1 secret engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{SecretDocument, SecretStore};
use crate::error::SecretStoreError;

/// Default timeout for secret reads.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the client token.
const TOKEN_HEADER: &str = "X-Vault-Token";

/// How server certificates are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsTrust {
    /// Verify against the system trust roots.
    Verify,
    /// Accept any certificate (self-signed lab deployments).
    #[default]
    Insecure,
}

/// KV v1 response envelope.
#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: Option<SecretDocument>,
}

/// Secret-store client.
#[derive(Clone)]
pub struct VaultClient {
    /// HTTP client.
    client: Client,
    /// Store address without trailing slash.
    address: String,
    /// Client token.
    token: Option<String>,
}

impl VaultClient {
    /// Configure a client for the store at `address`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        address: impl Into<String>,
        tls: TlsTrust,
        request_timeout: Duration,
    ) -> Result<Self, SecretStoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(tls == TlsTrust::Insecure)
            .build()?;

        Ok(Self {
            client,
            address: address.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set the token sent with every read.
    pub fn authenticate(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Builder form of [`Self::authenticate`].
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.authenticate(token);
        self
    }

    fn secret_url(&self, mount_path: &str, secret_name: &str) -> String {
        format!(
            "{}/v1/{}/{}",
            self.address,
            mount_path.trim_matches('/'),
            secret_name.trim_matches('/')
        )
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn read(
        &self,
        mount_path: &str,
        secret_name: &str,
    ) -> Result<SecretDocument, SecretStoreError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| SecretStoreError::Auth("no token configured".to_string()))?;

        let url = self.secret_url(mount_path, secret_name);
        debug!(url = %url, "GET secret");

        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, token)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        match status {
            s if s.is_success() => {
                let body: ReadResponse = serde_json::from_str(&text).map_err(|e| {
                    warn!(error = %e, "Failed to parse secret response");
                    SecretStoreError::Malformed(e.to_string())
                })?;
                body.data.ok_or_else(|| {
                    SecretStoreError::Malformed("response has no 'data' object".to_string())
                })
            }
            StatusCode::NOT_FOUND => Err(SecretStoreError::NotFound(format!(
                "{mount_path}/{secret_name}"
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SecretStoreError::Auth(text)),
            _ => Err(SecretStoreError::Api {
                status: status.as_u16(),
                message: text,
            }),
        }
    }
}
