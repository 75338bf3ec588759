//! Fleet power-state reconciliation over out-of-band management.
//!
//! For every requested host this crate resolves management credentials
//! (config document first, secret store for whatever is missing), opens a
//! session to the host's management controller, reads the chassis power
//! state, issues a power command when the requested action needs one, and
//! polls until the chassis converges or the timeout passes. Hosts run
//! concurrently and fail independently.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use powerctl::bmc::IpmiTool;
//! use powerctl::secrets::{TlsTrust, VaultClient, DEFAULT_REQUEST_TIMEOUT};
//! use powerctl::{
//!     Action, ControllerSettings, CredentialResolver, FleetExecutor, HostDescriber,
//!     PowerController, RunConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (_, doc) = powerctl::config::load_config(&powerctl::config::parse_search_path(
//!         powerctl::config::DEFAULT_CONFIG_SEARCH_PATH,
//!     ))?;
//!     let run = RunConfig::new(["node1.lab"], Action::On)?;
//!
//!     let store = VaultClient::new(&doc.vault.hostname, TlsTrust::Insecure, DEFAULT_REQUEST_TIMEOUT)?
//!         .with_token("s.example");
//!     let resolver = CredentialResolver::new(Arc::new(store), &doc.vault, run.retry_policy())?;
//!     let describer = HostDescriber::new(&doc, resolver);
//!     let controller = PowerController::new(Arc::new(IpmiTool::default()), ControllerSettings::from(&run));
//!
//!     let report = FleetExecutor::new(run.max_parallel)
//!         .reconcile_hosts(&run.hosts, &describer, &controller, run.action)
//!         .await;
//!     powerctl::report::write_report(&report, &mut std::io::stdout())?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod bmc;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod fleet;
pub mod host;
pub mod report;
pub mod retry;
pub mod secrets;

pub use action::Action;
pub use config::{ConfigDocument, HostConfig, RunConfig, VaultConfig};
pub use controller::{ControllerSettings, Phase, PowerController};
pub use credentials::{CredentialResolver, Credentials};
pub use error::{BmcError, CredentialIssue, PowerError, SecretStoreError};
pub use fleet::{FleetExecutor, FleetReport, Outcome};
pub use host::{HostDescriber, HostDescriptor};
pub use retry::RetryPolicy;
