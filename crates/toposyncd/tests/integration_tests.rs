//! End-to-end pipeline tests over the fixture lab.
//!
//! Each test wires the full orchestrator (probe pool, the three resolution
//! tasks, and the drain) against an in-memory lab and a recording sink, then
//! asserts on what reached persistence.

use std::sync::Arc;
use std::time::Duration;

use topo_types::NeighborRecord;
use toposyncd::mock::{DeviceFixture, LinkFixture, MockLab, RecordingSink};
use toposyncd::scan::{DiscoveryOrchestrator, OrchestratorSettings, ProbeStats};
use toposyncd::DrainStats;

fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        probe_capacity: 8,
        idle_epoch_limit: 4,
        sweep_backoff: Duration::from_millis(20),
    }
}

fn fixture(address: &str, chassis: &str, links: Vec<LinkFixture>) -> DeviceFixture {
    DeviceFixture {
        management_address: address.to_string(),
        model: "S6850".to_string(),
        role: "T1".to_string(),
        chassis_id: chassis.to_string(),
        links,
    }
}

fn link(index: u32, local: &str, remote_chassis: &str, remote: &str) -> LinkFixture {
    LinkFixture {
        index,
        local_port: local.to_string(),
        remote_chassis: remote_chassis.to_string(),
        remote_port: remote.to_string(),
    }
}

struct PipelineOutcome {
    probes: ProbeStats,
    drain: DrainStats,
    still_pending: usize,
    records: Vec<NeighborRecord>,
}

async fn run_pipeline(lab: MockLab, settings: OrchestratorSettings) -> PipelineOutcome {
    let devices = lab.devices();
    let sink = Arc::new(RecordingSink::new());
    let mut orchestrator = DiscoveryOrchestrator::new(devices, Arc::new(lab), settings);

    let probes = orchestrator.run_probes().unwrap();
    let resolution = orchestrator.run_resolution().unwrap();
    let drain = orchestrator.drain(sink.clone(), 1).unwrap();

    let probe_stats = probes.await.unwrap();
    resolution.await.unwrap();
    let drain_stats = drain.await.unwrap();

    PipelineOutcome {
        probes: probe_stats,
        drain: drain_stats,
        still_pending: orchestrator.still_pending(),
        records: sink.records(),
    }
}

fn records_between<'a>(
    records: &'a [NeighborRecord],
    local: &str,
    remote: &str,
) -> Vec<&'a NeighborRecord> {
    records
        .iter()
        .filter(|r| r.local_address == local && r.remote_address() == Some(remote))
        .collect()
}

#[tokio::test]
async fn test_neighbor_resolves_when_remote_announces_first() {
    // The probing device is delayed, so its neighbor's chassis id is in the
    // table before aggregation runs and the record takes the immediate path.
    let lab = MockLab::new()
        .with_fixture(fixture(
            "172.0.0.1",
            "aabbccddee01",
            vec![link(1, "p1", "aabbccddee02", "p9")],
        ))
        .with_fixture(fixture("172.0.0.2", "aabbccddee02", Vec::new()))
        .with_connect_delay("172.0.0.1", Duration::from_millis(100));

    let outcome = run_pipeline(lab, fast_settings()).await;
    assert_eq!(outcome.probes.failed, 0);
    assert_eq!(outcome.still_pending, 0);

    let records = records_between(&outcome.records, "172.0.0.1", "172.0.0.2");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local_ports, vec!["p1"]);
    assert_eq!(records[0].remote_ports, vec!["p9"]);
}

#[tokio::test]
async fn test_neighbor_resolves_through_sweep_when_remote_announces_late() {
    // The remote device probes long after the local one, so the record must
    // pend first and be picked up by a later sweep.
    let lab = MockLab::new()
        .with_fixture(fixture(
            "172.0.0.1",
            "aabbccddee01",
            vec![link(1, "p1", "aabbccddee02", "p9")],
        ))
        .with_fixture(fixture("172.0.0.2", "aabbccddee02", Vec::new()))
        .with_connect_delay("172.0.0.2", Duration::from_millis(200));

    let outcome = run_pipeline(lab, fast_settings()).await;
    assert_eq!(outcome.still_pending, 0);

    let records = records_between(&outcome.records, "172.0.0.1", "172.0.0.2");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local_ports, vec!["p1"]);
    assert_eq!(records[0].remote_ports, vec!["p9"]);
}

#[tokio::test]
async fn test_multi_link_neighbors_share_one_record() {
    let outcome = run_pipeline(MockLab::lab(), fast_settings()).await;
    assert_eq!(outcome.probes.probed, 3);
    assert_eq!(outcome.probes.failed, 0);
    assert_eq!(outcome.still_pending, 0);
    assert_eq!(outcome.drain.failed, 0);

    // sw1 and sw2 are cabled twice; each side reports one record carrying
    // both port pairs.
    let forward = records_between(&outcome.records, "172.0.0.1", "172.0.0.2");
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].local_ports, vec!["FGE1/0/1", "FGE1/0/2"]);
    assert_eq!(forward[0].remote_ports, vec!["FGE2/0/1", "FGE2/0/2"]);

    let reverse = records_between(&outcome.records, "172.0.0.2", "172.0.0.1");
    assert_eq!(reverse.len(), 1);
    assert_eq!(reverse[0].link_count(), 2);

    // Every stored record is resolved with parallel port lists.
    assert!(outcome.records.iter().all(|r| r.remote_address().is_some()));
    assert!(outcome
        .records
        .iter()
        .all(|r| r.local_ports.len() == r.remote_ports.len()));
}

#[tokio::test]
async fn test_unannounced_chassis_stays_pending_without_blocking_shutdown() {
    // 172.0.0.1 reports a neighbor whose chassis id no device ever
    // announces; the sweep gives up after its idle epochs and the scan
    // still terminates.
    let lab = MockLab::new()
        .with_fixture(fixture(
            "172.0.0.1",
            "aabbccddee01",
            vec![
                link(1, "p1", "ffffffffffff", "p9"),
                link(2, "p2", "aabbccddee02", "p8"),
            ],
        ))
        .with_fixture(fixture("172.0.0.2", "aabbccddee02", Vec::new()));

    let outcome = run_pipeline(lab, fast_settings()).await;
    assert_eq!(outcome.still_pending, 1);

    let resolved = records_between(&outcome.records, "172.0.0.1", "172.0.0.2");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].local_ports, vec!["p2"]);
    assert!(outcome
        .records
        .iter()
        .all(|r| r.remote_address() != Some("ffffffffffff")));
}

#[tokio::test]
async fn test_probe_failure_is_local_to_one_device() {
    let lab = MockLab::lab().with_connect_failure("172.0.0.3");

    let outcome = run_pipeline(lab, fast_settings()).await;
    assert_eq!(outcome.probes.probed, 3);
    assert_eq!(outcome.probes.failed, 1);

    // sw1/sw2 still resolve each other; records pointing at the dead
    // switch stay pending because it never announced its chassis id.
    assert_eq!(records_between(&outcome.records, "172.0.0.1", "172.0.0.2").len(), 1);
    assert_eq!(records_between(&outcome.records, "172.0.0.2", "172.0.0.1").len(), 1);
    assert!(outcome.records.iter().all(|r| r.local_address != "172.0.0.3"));
    assert_eq!(outcome.still_pending, 2);
}

#[tokio::test]
async fn test_sink_errors_do_not_abort_the_drain() {
    let lab = MockLab::lab();
    let devices = lab.devices();
    let sink = Arc::new(RecordingSink::failing_first(1));
    let mut orchestrator = DiscoveryOrchestrator::new(devices, Arc::new(lab), fast_settings());

    let probes = orchestrator.run_probes().unwrap();
    let resolution = orchestrator.run_resolution().unwrap();
    let drain = orchestrator.drain(sink.clone(), 1).unwrap();

    probes.await.unwrap();
    resolution.await.unwrap();
    let drained = drain.await.unwrap();

    assert_eq!(drained.failed, 1);
    assert!(drained.saved > 0);
    assert_eq!(sink.flushes(), 1);
}
