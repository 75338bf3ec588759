//! Concurrent execution across a fleet.
//!
//! One task per host, all started together and awaited together. Hosts
//! fail independently. Outcomes travel over a channel to a single
//! collector, so no task writes into shared state.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::action::Action;
use crate::controller::PowerController;
use crate::error::PowerError;
use crate::host::{HostDescriber, HostDescriptor};

/// Result for one host: final observed power state or the error that stopped it.
pub type Outcome = Result<bool, PowerError>;

/// Outcomes of a fleet run, keyed by hostname and kept in request order.
#[derive(Debug, Default)]
pub struct FleetReport {
    order: Vec<String>,
    outcomes: HashMap<String, Outcome>,
}

impl FleetReport {
    /// Outcome for `hostname`.
    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<&Outcome> {
        self.outcomes.get(hostname)
    }

    /// Outcomes in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.order
            .iter()
            .filter_map(|h| self.outcomes.get(h).map(|o| (h.as_str(), o)))
    }

    /// Number of hosts with an outcome.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the report is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of hosts that ended in error.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_err()).count()
    }
}

/// Fans a per-host job out over the fleet.
#[derive(Debug, Clone, Default)]
pub struct FleetExecutor {
    /// Hosts processed at once; `None` is unbounded.
    max_parallel: Option<NonZeroUsize>,
}

impl FleetExecutor {
    /// Create an executor running at most `max_parallel` hosts at once.
    #[must_use]
    pub const fn new(max_parallel: Option<NonZeroUsize>) -> Self {
        Self { max_parallel }
    }

    /// Run every job and wait for all of them.
    ///
    /// Hostnames are expected to be unique. A job that panics is reported
    /// as [`PowerError::Aborted`] for its host.
    pub async fn execute<Fut>(&self, jobs: Vec<(String, Fut)>) -> FleetReport
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let semaphore = self
            .max_parallel
            .map(|limit| Arc::new(Semaphore::new(limit.get())));
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Outcome)>();
        let mut join_set = JoinSet::new();
        let mut order = Vec::with_capacity(jobs.len());

        info!(
            hosts = jobs.len(),
            max_parallel = self.max_parallel.map_or(0, NonZeroUsize::get),
            "Starting fleet run"
        );

        for (hostname, job) in jobs {
            order.push(hostname.clone());
            let tx = tx.clone();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            let _ = tx.send((
                                hostname.clone(),
                                Err(PowerError::Aborted {
                                    hostname,
                                    message: e.to_string(),
                                }),
                            ));
                            return;
                        }
                    },
                    None => None,
                };

                let outcome = job.await;
                debug!(hostname = %hostname, ok = outcome.is_ok(), "Host task finished");
                // Receiver outlives every task.
                let _ = tx.send((hostname, outcome));
            });
        }
        drop(tx);

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Host task did not complete");
            }
        }

        let mut outcomes = HashMap::with_capacity(order.len());
        while let Some((hostname, outcome)) = rx.recv().await {
            outcomes.insert(hostname, outcome);
        }
        for hostname in &order {
            outcomes.entry(hostname.clone()).or_insert_with(|| {
                Err(PowerError::Aborted {
                    hostname: hostname.clone(),
                    message: "task panicked".to_string(),
                })
            });
        }

        let report = FleetReport { order, outcomes };
        info!(
            hosts = report.len(),
            failures = report.failures(),
            "Fleet run complete"
        );
        report
    }

    /// Apply `action` to already-built descriptors.
    pub async fn run(
        &self,
        descriptors: Vec<HostDescriptor>,
        controller: &PowerController,
        action: Action,
    ) -> FleetReport {
        let jobs = descriptors
            .into_iter()
            .map(|descriptor| {
                let controller = controller.clone();
                (descriptor.hostname.clone(), async move {
                    controller.reconcile(&descriptor, action).await
                })
            })
            .collect();
        self.execute(jobs).await
    }

    /// Resolve each host's descriptor and apply `action`, all inside the host's task.
    ///
    /// A host whose credentials cannot be resolved fails on its own without
    /// a session being opened.
    pub async fn reconcile_hosts(
        &self,
        hosts: &[String],
        describer: &HostDescriber,
        controller: &PowerController,
        action: Action,
    ) -> FleetReport {
        let jobs = hosts
            .iter()
            .map(|hostname| {
                let describer = describer.clone();
                let controller = controller.clone();
                let name = hostname.clone();
                (hostname.clone(), async move {
                    match describer.describe(&name).await {
                        Ok(descriptor) => controller.reconcile(&descriptor, action).await,
                        Err(e) => Err(e),
                    }
                })
            })
            .collect();
        self.execute(jobs).await
    }
}
