//! Secret-store access.
//!
//! The resolver only needs one operation: read the document stored at a
//! mount path and secret name. [`VaultClient`] does that over HTTP;
//! [`StaticSecretStore`] serves fixed documents from memory.

mod vault;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::SecretStoreError;

pub use vault::{TlsTrust, VaultClient, DEFAULT_REQUEST_TIMEOUT};

/// A secret document: string keys to arbitrary values.
pub type SecretDocument = Map<String, Value>;

/// Read access to a networked secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the document at `mount_path`/`secret_name`.
    async fn read(
        &self,
        mount_path: &str,
        secret_name: &str,
    ) -> Result<SecretDocument, SecretStoreError>;
}

/// In-memory secret store.
///
/// Reads are counted, and failures can be queued ahead of the stored
/// documents to exercise retry paths.
#[derive(Default)]
pub struct StaticSecretStore {
    documents: HashMap<String, SecretDocument>,
    failures: Mutex<VecDeque<SecretStoreError>>,
    reads: AtomicUsize,
}

impl StaticSecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `document` at `mount_path`/`secret_name`.
    #[must_use]
    pub fn with_document(
        mut self,
        mount_path: &str,
        secret_name: &str,
        document: SecretDocument,
    ) -> Self {
        self.documents
            .insert(format!("{mount_path}/{secret_name}"), document);
        self
    }

    /// Fail the next read with `error`. Queued failures are consumed in order.
    #[must_use]
    pub fn with_failure(self, error: SecretStoreError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
        self
    }

    /// Number of reads served so far, failed ones included.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn read(
        &self,
        mount_path: &str,
        secret_name: &str,
    ) -> Result<SecretDocument, SecretStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let queued = self
            .failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());
        if let Some(error) = queued {
            return Err(error);
        }

        let key = format!("{mount_path}/{secret_name}");
        self.documents
            .get(&key)
            .cloned()
            .ok_or(SecretStoreError::NotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_static_store_serves_failures_first() {
        let doc = json!({"hosts": []}).as_object().cloned().unwrap();
        let store = StaticSecretStore::new()
            .with_document("secret", "ipmi", doc.clone())
            .with_failure(SecretStoreError::Auth("denied".into()));

        assert!(matches!(
            store.read("secret", "ipmi").await,
            Err(SecretStoreError::Auth(_))
        ));
        assert_eq!(store.read("secret", "ipmi").await.unwrap(), doc);
        assert!(matches!(
            store.read("secret", "other").await,
            Err(SecretStoreError::NotFound(path)) if path == "secret/other"
        ));
        assert_eq!(store.reads(), 3);
    }
}
