//! In-memory management controllers for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{ManagementClient, PowerCommand, PowerSession};
use crate::error::BmcError;
use crate::host::HostDescriptor;

/// Scripted behavior of one simulated controller.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHost {
    power: bool,
    connect_error: Option<String>,
    open_delay: Duration,
    query_delay: Duration,
    failing_queries: u32,
    failing_commands: u32,
    settle_after: u32,
    pending: Option<(bool, u32)>,
    commands: Vec<PowerCommand>,
    command_attempts: u32,
    queries: u32,
}

impl SimulatedHost {
    /// Controller whose chassis is currently `on`.
    #[must_use]
    pub fn powered(on: bool) -> Self {
        Self {
            power: on,
            ..Self::default()
        }
    }

    /// Refuse every session with `message`.
    #[must_use]
    pub fn refuse_connection(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    /// Take `delay` to open a session.
    #[must_use]
    pub const fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Take `delay` to answer each power query.
    #[must_use]
    pub const fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Fail the next `count` power queries.
    #[must_use]
    pub const fn failing_queries(mut self, count: u32) -> Self {
        self.failing_queries = count;
        self
    }

    /// Reject the next `count` power commands.
    #[must_use]
    pub const fn failing_commands(mut self, count: u32) -> Self {
        self.failing_commands = count;
        self
    }

    /// Keep reporting the old state for `queries` queries after a command.
    #[must_use]
    pub const fn settle_after(mut self, queries: u32) -> Self {
        self.settle_after = queries;
        self
    }

    fn query(&mut self) -> Result<bool, BmcError> {
        self.queries += 1;
        if self.failing_queries > 0 {
            self.failing_queries -= 1;
            return Err(BmcError::Simulated(format!(
                "chassis status timed out on query {}",
                self.queries
            )));
        }

        if let Some((target, remaining)) = self.pending {
            if remaining == 0 {
                self.power = target;
                self.pending = None;
            } else {
                self.pending = Some((target, remaining - 1));
            }
        }
        Ok(self.power)
    }

    fn command(&mut self, command: PowerCommand) -> Result<(), BmcError> {
        self.command_attempts += 1;
        if self.failing_commands > 0 {
            self.failing_commands -= 1;
            return Err(BmcError::Simulated(format!(
                "command rejected on attempt {}",
                self.command_attempts
            )));
        }

        self.commands.push(command);
        self.pending = Some((command == PowerCommand::Up, self.settle_after));
        Ok(())
    }
}

/// Simulated fleet of management controllers.
///
/// Unknown hosts refuse connections. Commands and queries are recorded
/// per host, and the number of simultaneously open sessions is tracked.
#[derive(Debug, Default)]
pub struct InMemoryBmc {
    hosts: HashMap<String, Arc<Mutex<SimulatedHost>>>,
    open_sessions: Arc<AtomicUsize>,
    peak_sessions: Arc<AtomicUsize>,
}

impl InMemoryBmc {
    /// Create an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller for `hostname`.
    #[must_use]
    pub fn with_host(mut self, hostname: impl Into<String>, host: SimulatedHost) -> Self {
        self.hosts
            .insert(hostname.into(), Arc::new(Mutex::new(host)));
        self
    }

    /// Commands issued to `hostname` so far.
    #[must_use]
    pub fn commands(&self, hostname: &str) -> Vec<PowerCommand> {
        self.with_state(hostname, |h| h.commands.clone())
            .unwrap_or_default()
    }

    /// Power commands attempted against `hostname`, rejected ones included.
    #[must_use]
    pub fn command_attempts(&self, hostname: &str) -> u32 {
        self.with_state(hostname, |h| h.command_attempts)
            .unwrap_or_default()
    }

    /// Power queries made against `hostname` so far.
    #[must_use]
    pub fn queries(&self, hostname: &str) -> u32 {
        self.with_state(hostname, |h| h.queries).unwrap_or_default()
    }

    /// Current simulated power state of `hostname`.
    #[must_use]
    pub fn power(&self, hostname: &str) -> Option<bool> {
        self.with_state(hostname, |h| h.power)
    }

    /// Highest number of sessions open at the same time.
    #[must_use]
    pub fn peak_sessions(&self) -> usize {
        self.peak_sessions.load(Ordering::SeqCst)
    }

    fn with_state<T>(&self, hostname: &str, f: impl FnOnce(&SimulatedHost) -> T) -> Option<T> {
        self.hosts.get(hostname).map(|h| f(&lock(h)))
    }
}

fn lock(host: &Mutex<SimulatedHost>) -> MutexGuard<'_, SimulatedHost> {
    host.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl ManagementClient for InMemoryBmc {
    async fn open(
        &self,
        host: &HostDescriptor,
        _debug: bool,
    ) -> Result<Box<dyn PowerSession>, BmcError> {
        let state = self
            .hosts
            .get(&host.hostname)
            .cloned()
            .ok_or_else(|| BmcError::Simulated(format!("no route to {}", host.ip)))?;

        let (refusal, delay) = {
            let guard = lock(&state);
            (guard.connect_error.clone(), guard.open_delay)
        };

        let open = self.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_sessions.fetch_max(open, Ordering::SeqCst);
        let session = InMemorySession {
            state,
            open_sessions: Arc::clone(&self.open_sessions),
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match refusal {
            Some(message) => Err(BmcError::Simulated(message)),
            None => Ok(Box::new(session)),
        }
    }
}

/// Session onto a simulated controller.
struct InMemorySession {
    state: Arc<Mutex<SimulatedHost>>,
    open_sessions: Arc<AtomicUsize>,
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PowerSession for InMemorySession {
    async fn chassis_power(&self) -> Result<bool, BmcError> {
        let delay = lock(&self.state).query_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.state).query()
    }

    async fn set_chassis_power(&self, command: PowerCommand) -> Result<(), BmcError> {
        lock(&self.state).command(command)
    }
}
