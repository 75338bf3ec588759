//! End-to-end reconciliation against an in-memory secret store and fleet.

use std::sync::{Arc, Once};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use powerctl::bmc::{InMemoryBmc, PowerCommand, SimulatedHost};
use powerctl::report::write_report;
use powerctl::secrets::{SecretDocument, StaticSecretStore};
use powerctl::{
    Action, ConfigDocument, ControllerSettings, CredentialIssue, CredentialResolver,
    FleetExecutor, HostDescriber, PowerController, PowerError, RunConfig, SecretStoreError,
};

const CONFIG: &str = r"
hosts:
  - hostname: node1.lab
    ipmi:
      ip: 10.0.0.11
      username: admin
  - hostname: node2.lab
    ipmi:
      ip: 10.0.0.12
      port: 6230
      username: root
      password: calvin
vault:
  hostname: https://vault.lab:8200
  path: secret/ipmi
";

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

fn secret_document() -> SecretDocument {
    json!({
        "hosts": [
            {"hostname": "node1.lab", "ipmi": {"username": "vault-admin", "password": "vault-pass"}},
            {"hostname": "node4.lab", "ipmi": {"username": "other", "password": "other-pass"}}
        ]
    })
    .as_object()
    .cloned()
    .unwrap()
}

struct Harness {
    doc: ConfigDocument,
    store: Arc<StaticSecretStore>,
    bmc: Arc<InMemoryBmc>,
    describer: HostDescriber,
    controller: PowerController,
    run: RunConfig,
}

fn harness(requested: &[&str], action: Action, store: StaticSecretStore) -> Harness {
    init_tracing();

    let doc = ConfigDocument::from_yaml(CONFIG).unwrap();
    let mut run = RunConfig::new(requested, action).unwrap();
    run.hosts = doc.canonical_hosts(&run.hosts);

    let store = Arc::new(store);
    let resolver = CredentialResolver::new(store.clone(), &doc.vault, run.retry_policy()).unwrap();
    let describer = HostDescriber::new(&doc, resolver);

    let bmc = Arc::new(
        InMemoryBmc::new()
            .with_host("node1.lab", SimulatedHost::powered(true))
            .with_host("node2.lab", SimulatedHost::powered(false))
            .with_host("node3.lab", SimulatedHost::powered(true)),
    );
    let controller = PowerController::new(bmc.clone(), ControllerSettings::from(&run));

    Harness {
        doc,
        store,
        bmc,
        describer,
        controller,
        run,
    }
}

#[tokio::test(start_paused = true)]
async fn test_fleet_off_with_mixed_credential_sources() {
    let store = StaticSecretStore::new().with_document("secret", "ipmi", secret_document());
    let h = harness(&["node1", "node2.lab", "node3.lab"], Action::Off, store);
    assert_eq!(h.run.hosts, vec!["node1.lab", "node2.lab", "node3.lab"]);
    let start = Instant::now();

    let report = FleetExecutor::new(h.run.max_parallel)
        .reconcile_hosts(&h.run.hosts, &h.describer, &h.controller, h.run.action)
        .await;

    // node1 was on: one command, one poll interval later it reads off.
    assert!(matches!(report.get("node1.lab"), Some(Ok(false))));
    assert_eq!(h.bmc.commands("node1.lab"), vec![PowerCommand::Down]);
    assert_eq!(h.bmc.queries("node1.lab"), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(5));

    // node2 was already off.
    assert!(matches!(report.get("node2.lab"), Some(Ok(false))));
    assert!(h.bmc.commands("node2.lab").is_empty());

    // node3 has no secret entry and never reaches its controller.
    assert!(matches!(
        report.get("node3.lab"),
        Some(Err(PowerError::CredentialResolution {
            issue: CredentialIssue::HostNotFound { .. },
            ..
        }))
    ));
    assert_eq!(h.bmc.queries("node3.lab"), 0);
    assert_eq!(h.bmc.power("node3.lab"), Some(true));

    // node2 has full credentials in the config document.
    assert_eq!(h.store.reads(), 2);
    assert_eq!(report.failures(), 1);

    let mut out = Vec::new();
    write_report(&report, &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "node1.lab: OFF\n\
         node2.lab: OFF\n\
         node3.lab: ERROR: credential resolution failed in secret at secret/ipmi: \
         host creds for node3.lab not found\n"
    );
}

#[tokio::test]
async fn test_descriptor_merges_config_and_secret_store() {
    let store = StaticSecretStore::new().with_document("secret", "ipmi", secret_document());
    let h = harness(&["node1.lab"], Action::Status, store);

    let node1 = h.describer.describe("node1.lab").await.unwrap();
    assert_eq!(node1.ip, "10.0.0.11");
    assert_eq!(node1.port, 623);
    assert_eq!(node1.username, "admin");
    assert_eq!(node1.password, "vault-pass");

    let node2 = h.describer.describe("node2.lab").await.unwrap();
    assert_eq!(node2.port, 6230);
    assert_eq!(node2.username, "root");
    assert_eq!(node2.password, "calvin");
    assert_eq!(h.store.reads(), 1);
    assert_eq!(h.doc.hosts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_secret_store_outage_fails_only_hosts_that_need_it() {
    let store = StaticSecretStore::new()
        .with_document("secret", "ipmi", secret_document())
        .with_failure(SecretStoreError::Auth("permission denied".to_string()))
        .with_failure(SecretStoreError::Auth("permission denied".to_string()))
        .with_failure(SecretStoreError::Auth("permission denied".to_string()));
    let h = harness(&["node1.lab", "node2.lab"], Action::Status, store);

    let report = FleetExecutor::new(h.run.max_parallel)
        .reconcile_hosts(&h.run.hosts, &h.describer, &h.controller, h.run.action)
        .await;

    assert!(matches!(
        report.get("node1.lab"),
        Some(Err(PowerError::SecretStore {
            source: SecretStoreError::Auth(_),
            ..
        }))
    ));
    assert_eq!(h.store.reads(), 3);
    assert_eq!(h.bmc.queries("node1.lab"), 0);

    assert!(matches!(report.get("node2.lab"), Some(Ok(false))));
    assert_eq!(h.bmc.queries("node2.lab"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_power_on_waits_for_slow_chassis() {
    init_tracing();
    let doc = ConfigDocument::from_yaml(CONFIG).unwrap();
    let mut run = RunConfig::new(["node2.lab"], Action::On).unwrap();
    run.poll_interval = Duration::from_secs(2);
    run.timeout = Duration::from_secs(30);

    let store = Arc::new(StaticSecretStore::new());
    let resolver = CredentialResolver::new(store.clone(), &doc.vault, run.retry_policy()).unwrap();
    let describer = HostDescriber::new(&doc, resolver);
    let bmc = Arc::new(
        InMemoryBmc::new().with_host("node2.lab", SimulatedHost::powered(false).settle_after(3)),
    );
    let controller = PowerController::new(bmc.clone(), ControllerSettings::from(&run));
    let start = Instant::now();

    let report = FleetExecutor::new(run.max_parallel)
        .reconcile_hosts(&run.hosts, &describer, &controller, run.action)
        .await;

    assert!(matches!(report.get("node2.lab"), Some(Ok(true))));
    // Three stale reads before the fourth poll sees it on.
    assert_eq!(bmc.queries("node2.lab"), 5);
    assert_eq!(start.elapsed(), Duration::from_secs(8));
    assert_eq!(store.reads(), 0);
}
