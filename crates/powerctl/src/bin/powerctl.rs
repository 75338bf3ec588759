//! powerctl CLI - chassis power control for a fleet of hosts.

use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use powerctl::bmc::IpmiTool;
use powerctl::config::{
    load_config, parse_search_path, resolve_vault_token, DEFAULT_CONFIG_SEARCH_PATH,
    VAULT_TOKEN_ENV,
};
use powerctl::report::write_report;
use powerctl::secrets::{TlsTrust, VaultClient, DEFAULT_REQUEST_TIMEOUT};
use powerctl::{
    Action, ControllerSettings, CredentialResolver, FleetExecutor, HostDescriber, PowerController,
    PowerError, RunConfig,
};

/// powerctl - query or switch chassis power on a fleet over IPMI.
#[derive(Parser)]
#[command(name = "powerctl")]
#[command(about = "Query or switch chassis power on a fleet of hosts over IPMI")]
struct Cli {
    /// Hosts to act on (comma-separated).
    #[arg(short = 'H', long, value_delimiter = ',')]
    hosts: Vec<String>,

    /// Action: on, off, or status.
    #[arg(short, long, default_value = "status")]
    action: String,

    /// Print extra debug information.
    #[arg(short, long, default_value = "false")]
    debug: bool,

    /// Never prompt for input.
    #[arg(short, long, default_value = "false")]
    noninteractive: bool,

    /// Seconds between power-state polls.
    #[arg(short = 'p', long, default_value = "5")]
    ipmipolltime: u64,

    /// Seconds to wait for the power state to change.
    #[arg(short = 'o', long, default_value = "60")]
    timeout: u64,

    /// Attempts for secret-store and IPMI calls.
    #[arg(short, long, default_value = "3")]
    retries: u32,

    /// Vault/OpenBao token (overrides the config file).
    #[arg(short, long)]
    token: Option<String>,

    /// Config file search path (comma-separated, first valid file wins).
    #[arg(short, long, default_value = DEFAULT_CONFIG_SEARCH_PATH)]
    config: String,

    /// Maximum hosts processed at once (0 = unbounded).
    #[arg(long, default_value = "0")]
    max_parallel: usize,

    /// Path to the ipmitool binary.
    #[arg(long, default_value = "ipmitool")]
    ipmitool: String,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let action: Action = self.action.parse()?;
        let mut run = RunConfig::new(&self.hosts, action)?;
        run.poll_interval = Duration::from_secs(self.ipmipolltime);
        run.timeout = Duration::from_secs(self.timeout);
        run.retries = self.retries;
        run.debug = self.debug;
        run.noninteractive = self.noninteractive;
        run.max_parallel = NonZeroUsize::new(self.max_parallel);
        Ok(run)
    }
}

fn prompt_token() -> Result<String, PowerError> {
    dialoguer::Password::new()
        .with_prompt("Enter vault token")
        .interact()
        .map_err(|e| PowerError::Config(format!("failed to read vault token: {e}")))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Action and hosts are checked before anything touches the network.
    let mut run = cli.run_config()?;

    let (config_path, doc) = load_config(&parse_search_path(&cli.config))?;
    info!(path = %config_path.display(), "Using configuration file");

    run.hosts = doc.canonical_hosts(&run.hosts);
    debug!(hosts = ?run.hosts, "Hosts to process");

    let (token, token_source) = resolve_vault_token(
        cli.token.as_deref(),
        &doc.vault,
        std::env::var(VAULT_TOKEN_ENV).ok(),
        run.noninteractive,
        prompt_token,
    )?;
    debug!(source = ?token_source, "Resolved vault token");

    let store = VaultClient::new(&doc.vault.hostname, TlsTrust::Insecure, DEFAULT_REQUEST_TIMEOUT)
        .context("Failed to create secret-store client")?
        .with_token(token);
    let resolver = CredentialResolver::new(Arc::new(store), &doc.vault, run.retry_policy())?;
    let describer = HostDescriber::new(&doc, resolver);
    let controller = PowerController::new(
        Arc::new(IpmiTool::new(&cli.ipmitool)),
        ControllerSettings::from(&run),
    );

    let report = FleetExecutor::new(run.max_parallel)
        .reconcile_hosts(&run.hosts, &describer, &controller, run.action)
        .await;

    let mut stdout = std::io::stdout().lock();
    write_report(&report, &mut stdout).context("Failed to write report")?;
    stdout.flush()?;

    if report.failures() > 0 {
        bail!("{} of {} hosts failed", report.failures(), report.len());
    }
    Ok(())
}
