//! Per-host power state machine.
//!
//! ```text
//! Disconnected -> Connected -> Queried -> Idle ----------------------> Done
//!                                      \-> Commanding -> Polling ---> Done
//! (any step) -------------------------------------------------------> Failed
//! ```
//!
//! Convergence is best effort: once a command is accepted the controller
//! polls until the observed state matches or the timeout passes, and then
//! reports whatever it last observed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::bmc::{ManagementClient, PowerCommand, PowerSession};
use crate::config::RunConfig;
use crate::error::PowerError;
use crate::host::HostDescriptor;
use crate::retry::{retry_async, RetryPolicy};

/// Controller states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session yet.
    Disconnected,
    /// Session open.
    Connected,
    /// Current power state known.
    Queried,
    /// Already in the desired state; nothing to do.
    Idle,
    /// Issuing the power command.
    Commanding,
    /// Waiting for the chassis to reach the desired state.
    Polling,
    /// Finished with an observed state.
    Done,
    /// Finished with an error.
    Failed,
}

/// Timing and retry settings shared by every host of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// Delay between convergence polls.
    pub poll_interval: Duration,
    /// Convergence budget.
    pub timeout: Duration,
    /// Policy for queries and commands.
    pub retry: RetryPolicy,
    /// Verbose management-interface output.
    pub debug: bool,
}

impl From<&RunConfig> for ControllerSettings {
    fn from(run: &RunConfig) -> Self {
        Self {
            poll_interval: run.poll_interval,
            timeout: run.timeout,
            retry: run.retry_policy(),
            debug: run.debug,
        }
    }
}

/// Drives one host at a time to the state an [`Action`] asks for.
#[derive(Clone)]
pub struct PowerController {
    client: Arc<dyn ManagementClient>,
    settings: ControllerSettings,
}

impl PowerController {
    /// Create a controller over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn ManagementClient>, settings: ControllerSettings) -> Self {
        Self { client, settings }
    }

    /// Apply `action` to `host` and return the final observed power state.
    ///
    /// # Errors
    /// Returns the first unrecoverable error: [`PowerError::Connect`],
    /// or [`PowerError::Query`] / [`PowerError::Command`] after retries.
    pub async fn reconcile(
        &self,
        host: &HostDescriptor,
        action: Action,
    ) -> Result<bool, PowerError> {
        transition(host, Phase::Disconnected);

        let result = self.drive(host, action).await;
        match &result {
            Ok(state) => {
                transition(host, Phase::Done);
                info!(
                    hostname = %host.hostname,
                    action = %action,
                    power_on = state,
                    "Host reconciled"
                );
            }
            Err(e) => {
                transition(host, Phase::Failed);
                warn!(hostname = %host.hostname, action = %action, error = %e, "Host failed");
            }
        }
        result
    }

    async fn drive(&self, host: &HostDescriptor, action: Action) -> Result<bool, PowerError> {
        let session = self
            .client
            .open(host, self.settings.debug)
            .await
            .map_err(|source| PowerError::Connect {
                hostname: host.hostname.clone(),
                source,
            })?;
        transition(host, Phase::Connected);

        let current = self.query_power(session.as_ref(), host).await?;
        transition(host, Phase::Queried);

        let desired = action.desired(current);
        if desired == current {
            transition(host, Phase::Idle);
            return Ok(current);
        }

        transition(host, Phase::Commanding);
        let command = PowerCommand::towards(desired);
        retry_async(&self.settings.retry, "chassis power command", || {
            session.set_chassis_power(command)
        })
        .await
        .map_err(|source| PowerError::Command {
            hostname: host.hostname.clone(),
            action,
            source,
        })?;
        debug!(hostname = %host.hostname, command = %command, "Power command accepted");

        transition(host, Phase::Polling);
        self.poll(session.as_ref(), host, desired, current).await
    }

    async fn query_power(
        &self,
        session: &dyn PowerSession,
        host: &HostDescriptor,
    ) -> Result<bool, PowerError> {
        let state = retry_async(&self.settings.retry, "chassis power query", || {
            session.chassis_power()
        })
        .await
        .map_err(|source| PowerError::Query {
            hostname: host.hostname.clone(),
            source,
        })?;

        debug!(hostname = %host.hostname, power_on = state, "Chassis power status");
        Ok(state)
    }

    /// Poll until `desired` is observed or the timeout passes.
    ///
    /// A wait starts only while elapsed time is under the timeout, and every
    /// query is cut off at timeout plus one poll interval, so polling never
    /// runs past that bound. A cut-off query leaves the last observation.
    async fn poll(
        &self,
        session: &dyn PowerSession,
        host: &HostDescriptor,
        desired: bool,
        before: bool,
    ) -> Result<bool, PowerError> {
        let start = Instant::now();
        let deadline = start + self.settings.timeout + self.settings.poll_interval;
        let mut observed = before;

        while start.elapsed() < self.settings.timeout {
            tokio::time::sleep(self.settings.poll_interval).await;
            match tokio::time::timeout_at(deadline, self.query_power(session, host)).await {
                Ok(state) => observed = state?,
                Err(_) => {
                    warn!(
                        hostname = %host.hostname,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Power query still running at the polling deadline"
                    );
                    break;
                }
            }

            debug!(
                hostname = %host.hostname,
                power_on = observed,
                elapsed_secs = start.elapsed().as_secs(),
                "Polled chassis power"
            );
            if observed == desired {
                return Ok(observed);
            }
        }

        warn!(
            hostname = %host.hostname,
            timeout_secs = self.settings.timeout.as_secs(),
            power_on = observed,
            "Power state did not converge before timeout"
        );
        Ok(observed)
    }
}

fn transition(host: &HostDescriptor, phase: Phase) {
    debug!(hostname = %host.hostname, phase = ?phase, "Power controller transition");
}
