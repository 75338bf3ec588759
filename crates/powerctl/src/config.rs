//! Run parameters and the on-disk configuration document.
//!
//! The config document is YAML, found by walking a search path; the first
//! file that exists and validates against [`ConfigDocument`] wins. There is
//! no merging across files.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::action::Action;
use crate::error::PowerError;
use crate::retry::RetryPolicy;

/// Default search path for the config document.
pub const DEFAULT_CONFIG_SEARCH_PATH: &str =
    "./config.yml,~/.labtwo/config.yaml,/etc/labtwo/config.yaml";

/// Environment variable consulted for the secret-store token.
pub const VAULT_TOKEN_ENV: &str = "VAULTTOKEN";

/// Default management port (IPMI over LAN).
pub const DEFAULT_IPMI_PORT: u16 = 623;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRIES: u32 = 3;

// ============================================================================
// Run parameters
// ============================================================================

/// Immutable parameters of a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Target hostnames in request order.
    pub hosts: Vec<String>,
    /// Action applied to every host.
    pub action: Action,
    /// Delay between convergence polls.
    pub poll_interval: Duration,
    /// Per-host convergence budget.
    pub timeout: Duration,
    /// Attempts allowed for each transient operation.
    pub retries: u32,
    /// Verbose management-interface output.
    pub debug: bool,
    /// Never prompt on the terminal.
    pub noninteractive: bool,
    /// Upper bound on hosts processed at once; `None` is unbounded.
    pub max_parallel: Option<NonZeroUsize>,
}

impl RunConfig {
    /// Create run parameters with default timings.
    ///
    /// Host names are trimmed, blanks dropped and duplicates removed while
    /// keeping request order.
    ///
    /// # Errors
    /// Returns [`PowerError::Config`] when no host remains.
    pub fn new<I, S>(hosts: I, action: Action) -> Result<Self, PowerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for host in hosts {
            let host = host.as_ref().trim();
            if !host.is_empty() && !unique.iter().any(|h| h == host) {
                unique.push(host.to_string());
            }
        }

        if unique.is_empty() {
            return Err(PowerError::Config(
                "no hosts specified. use -H or --hosts flag".to_string(),
            ));
        }

        Ok(Self {
            hosts: unique,
            action,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            debug: false,
            noninteractive: false,
            max_parallel: None,
        })
    }

    /// Retry policy for every transient operation of this run.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retries)
    }
}

// ============================================================================
// Config document
// ============================================================================

/// Top-level config document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigDocument {
    /// Known hosts.
    pub hosts: Vec<HostEntry>,
    /// Secret-store settings.
    pub vault: VaultConfig,
}

/// One host in the config document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostEntry {
    /// Canonical hostname.
    pub hostname: String,
    /// Primary address of the host itself.
    #[serde(default)]
    pub ip: Option<String>,
    /// Management-controller overrides.
    #[serde(default)]
    pub ipmi: HostConfig,
}

/// Per-host management overrides. Missing credentials fall back to the secret store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostConfig {
    /// Controller DNS name.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Controller address.
    #[serde(default)]
    pub ip: Option<String>,
    /// Controller port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login name.
    #[serde(default)]
    pub username: Option<String>,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
}

impl HostConfig {
    /// Whether both credentials are set, so the secret store is not needed.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Secret-store settings from the config document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VaultConfig {
    /// Store address, e.g. `https://vault.example:8200`.
    pub hostname: String,
    /// Secret path; the last segment is the secret name.
    pub path: String,
    /// Token, unless supplied on the command line or environment.
    #[serde(default)]
    pub token: Option<String>,
}

impl VaultConfig {
    /// Split `path` into mount path and secret name on its final `/`.
    ///
    /// # Errors
    /// Returns [`PowerError::Config`] when either part would be empty.
    pub fn split_path(&self) -> Result<(String, String), PowerError> {
        let trimmed = self.path.trim_matches('/');
        match trimmed.rsplit_once('/') {
            Some((mount, secret)) if !mount.is_empty() && !secret.is_empty() => {
                Ok((mount.to_string(), secret.to_string()))
            }
            _ => Err(PowerError::Config(format!(
                "'vault.path' must be <mount>/<secret>, got '{}'",
                self.path
            ))),
        }
    }
}

impl ConfigDocument {
    /// Parse and validate a YAML document.
    ///
    /// # Errors
    /// Returns the schema diagnostic when the document does not match.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Overrides for `hostname`, matched exactly.
    #[must_use]
    pub fn host_config(&self, hostname: &str) -> Option<&HostConfig> {
        self.hosts
            .iter()
            .find(|h| h.hostname == hostname)
            .map(|h| &h.ipmi)
    }

    /// Map requested names onto configured hostnames.
    ///
    /// A request matches a host exactly or by its first DNS label, and is
    /// replaced by the configured name. Unknown requests are kept as given.
    #[must_use]
    pub fn canonical_hosts(&self, requested: &[String]) -> Vec<String> {
        let mut canonical: Vec<String> = Vec::with_capacity(requested.len());

        for host in requested {
            let matched = self
                .hosts
                .iter()
                .find(|h| h.hostname == *host)
                .or_else(|| {
                    self.hosts
                        .iter()
                        .find(|h| h.hostname.split('.').next() == Some(host.as_str()))
                });

            let name = if let Some(entry) = matched {
                debug!(
                    requested = %host,
                    hostname = %entry.hostname,
                    "Matched host in configuration"
                );
                entry.hostname.clone()
            } else {
                warn!(
                    hostname = %host,
                    "Host not in configuration, credentials come from the secret store"
                );
                host.clone()
            };

            if !canonical.contains(&name) {
                canonical.push(name);
            }
        }

        canonical
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Split a comma-separated search path, expanding a leading `~` to the home directory.
#[must_use]
pub fn parse_search_path(spec: &str) -> Vec<PathBuf> {
    let home = dirs::home_dir();
    spec.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| expand_home(p, home.as_deref()))
        .collect()
}

/// Expand a bare `~` or a `~/` prefix against `home`.
///
/// `~user` forms and paths without a known home directory are kept as given.
fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home.to_path_buf();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Load the first config document in `candidates` that exists and validates.
///
/// # Errors
/// Returns [`PowerError::Config`] when no candidate loads.
pub fn load_config(candidates: &[PathBuf]) -> Result<(PathBuf, ConfigDocument), PowerError> {
    let mut last_problem: Option<String> = None;

    for path in candidates {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist");
            continue;
        }

        match load_file(path) {
            Ok(doc) => {
                debug!(path = %path.display(), hosts = doc.hosts.len(), "Loaded config file");
                return Ok((path.clone(), doc));
            }
            Err(problem) => {
                warn!(path = %path.display(), error = %problem, "Skipping config file");
                last_problem = Some(format!("{}: {problem}", path.display()));
            }
        }
    }

    let searched = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(PowerError::Config(match last_problem {
        Some(problem) => {
            format!("no valid configuration file found in [{searched}]; last error: {problem}")
        }
        None => format!("no valid configuration file found in [{searched}]"),
    }))
}

fn load_file(path: &Path) -> Result<ConfigDocument, String> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read config: {e}"))?;
    ConfigDocument::from_yaml(&contents).map_err(|e| format!("Failed to parse config: {e}"))
}

/// Where the secret-store token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `--token` flag.
    CommandLine,
    /// `vault.token` in the config document.
    ConfigFile,
    /// [`VAULT_TOKEN_ENV`].
    Environment,
    /// Asked on the terminal.
    Prompt,
}

/// Pick the secret-store token.
///
/// Precedence: command line, config document, environment, then `prompt`
/// unless `noninteractive` is set. Empty values count as unset.
///
/// # Errors
/// Returns [`PowerError::Config`] when no token can be found.
pub fn resolve_vault_token<P>(
    cli_token: Option<&str>,
    vault: &VaultConfig,
    env_token: Option<String>,
    noninteractive: bool,
    prompt: P,
) -> Result<(String, TokenSource), PowerError>
where
    P: FnOnce() -> Result<String, PowerError>,
{
    let non_empty = |t: &str| !t.trim().is_empty();

    if let Some(token) = cli_token.filter(|t| non_empty(t)) {
        if vault.token.is_some() {
            debug!("Vault token set in configuration file and on the command line, using the command line");
        }
        return Ok((token.to_string(), TokenSource::CommandLine));
    }
    if let Some(token) = vault.token.as_deref().filter(|t| non_empty(t)) {
        return Ok((token.to_string(), TokenSource::ConfigFile));
    }
    if let Some(token) = env_token.filter(|t| non_empty(t)) {
        debug!("Vault token taken from {VAULT_TOKEN_ENV}");
        return Ok((token, TokenSource::Environment));
    }
    if noninteractive {
        return Err(PowerError::Config("can't find vault token".to_string()));
    }

    let token = prompt()?;
    if non_empty(&token) {
        Ok((token, TokenSource::Prompt))
    } else {
        Err(PowerError::Config("empty vault token entered".to_string()))
    }
}
