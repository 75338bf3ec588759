//! Error types for power reconciliation and its collaborators.

use thiserror::Error;

use crate::action::Action;

/// Errors surfaced by a secret-store read.
#[derive(Error, Debug)]
pub enum SecretStoreError {
    /// HTTP request failed (transport error or timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store rejected the token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Nothing stored at the requested path.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// Store returned an unexpected error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body was not a secret document.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors surfaced by the out-of-band management interface.
#[derive(Error, Debug)]
pub enum BmcError {
    /// The management tool could not be started.
    #[error("failed to execute {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The controller answered with a failure.
    #[error("command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// The controller answered with something we could not interpret.
    #[error("unexpected response to '{command}': {output}")]
    UnexpectedResponse { command: String, output: String },

    /// Scripted failure from an in-memory backend.
    #[error("{0}")]
    Simulated(String),
}

/// What was wrong with a secret document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialIssue {
    /// A required key is absent.
    #[error("'{key}' key not found at {location}")]
    MissingKey { key: String, location: String },

    /// A value has the wrong type.
    #[error("'{key}' at {location} is not {expected}")]
    WrongType {
        key: String,
        location: String,
        expected: &'static str,
    },

    /// No entry for the host.
    #[error("host creds for {hostname} not found")]
    HostNotFound { hostname: String },

    /// A resolved credential is empty.
    #[error("empty {field} for host {hostname}")]
    EmptyField {
        hostname: String,
        field: &'static str,
    },
}

/// Errors produced while reconciling host power state.
#[derive(Error, Debug)]
pub enum PowerError {
    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Secret document did not yield credentials for a host.
    #[error("credential resolution failed in secret at {path}: {issue}")]
    CredentialResolution { path: String, issue: CredentialIssue },

    /// Secret-store read failed after all retries.
    #[error("reading secret at {path} failed: {source}")]
    SecretStore {
        path: String,
        #[source]
        source: SecretStoreError,
    },

    /// Session could not be opened.
    #[error("error connecting to host {hostname}: {source}")]
    Connect {
        hostname: String,
        #[source]
        source: BmcError,
    },

    /// Power state could not be read after all retries.
    #[error("error getting chassis status for host {hostname}: {source}")]
    Query {
        hostname: String,
        #[source]
        source: BmcError,
    },

    /// Power command was not accepted after all retries.
    #[error("error executing action {action} for host {hostname}: {source}")]
    Command {
        hostname: String,
        action: Action,
        #[source]
        source: BmcError,
    },

    /// Action name is not one of on/off/status.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Host task ended without producing an outcome.
    #[error("task for host {hostname} aborted: {message}")]
    Aborted { hostname: String, message: String },
}
