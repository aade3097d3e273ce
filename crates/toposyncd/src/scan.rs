//! Scan orchestration: probe pool, resolution tasks, and termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use topo_types::{ChassisAnnouncement, DeviceDescriptor, NeighborRecord, NeighborSink, SessionFactory};
use tracing::{debug, error, info, warn};

use crate::chassis_table::ChassisIdentityTable;
use crate::drain::{DrainStats, ResultDrain};
use crate::error::{Result, ScanError};
use crate::pending::PendingNeighborRegistry;
use crate::probe::{DeviceNeighborProbe, ProbeChannels};

/// Queue depth of the announcement, unresolved and resolved channels.
const CHANNEL_CAPACITY: usize = 100;

/// Tuning knobs for one scan.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum number of device probes in flight at once.
    pub probe_capacity: usize,
    /// Consecutive empty sweeps after scan completion before the sweep
    /// resolver gives up on the remaining pending entries.
    pub idle_epoch_limit: u32,
    /// Pause between empty sweeps.
    pub sweep_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            probe_capacity: 500,
            idle_epoch_limit: 4,
            sweep_backoff: Duration::from_secs(1),
        }
    }
}

/// Outcome of the probe stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStats {
    pub probed: usize,
    pub failed: usize,
}

/// Drives one full discovery scan.
///
/// Call order: [`run_probes`](Self::run_probes), then
/// [`run_resolution`](Self::run_resolution), then [`drain`](Self::drain);
/// each stage is started once and the returned handles are awaited together.
/// The channels between the stages close as their producers finish, so the
/// downstream loops terminate without polling queue lengths; only the sweep
/// resolver keeps its idle-epoch heuristic, because its input is the pending
/// registry rather than a channel.
pub struct DiscoveryOrchestrator<F: SessionFactory> {
    devices: Vec<DeviceDescriptor>,
    factory: Arc<F>,
    table: Arc<ChassisIdentityTable>,
    pending: Arc<PendingNeighborRegistry>,
    scan_finished: Arc<AtomicBool>,
    settings: OrchestratorSettings,
    announce_tx: Option<mpsc::Sender<ChassisAnnouncement>>,
    announce_rx: Option<mpsc::Receiver<ChassisAnnouncement>>,
    unresolved_tx: Option<mpsc::Sender<NeighborRecord>>,
    unresolved_rx: Option<mpsc::Receiver<NeighborRecord>>,
    resolved_tx: Option<mpsc::Sender<NeighborRecord>>,
    resolved_rx: Option<mpsc::Receiver<NeighborRecord>>,
}

impl<F: SessionFactory> DiscoveryOrchestrator<F> {
    pub fn new(
        devices: Vec<DeviceDescriptor>,
        factory: Arc<F>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (announce_tx, announce_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (unresolved_tx, unresolved_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (resolved_tx, resolved_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            devices,
            factory,
            table: Arc::new(ChassisIdentityTable::new()),
            pending: Arc::new(PendingNeighborRegistry::new()),
            scan_finished: Arc::new(AtomicBool::new(false)),
            settings,
            announce_tx: Some(announce_tx),
            announce_rx: Some(announce_rx),
            unresolved_tx: Some(unresolved_tx),
            unresolved_rx: Some(unresolved_rx),
            resolved_tx: Some(resolved_tx),
            resolved_rx: Some(resolved_rx),
        }
    }

    /// Chassis identity table for this scan.
    pub fn table(&self) -> Arc<ChassisIdentityTable> {
        self.table.clone()
    }

    /// Records still pending once the scan is over: neighbors whose chassis
    /// id was never announced.
    pub fn still_pending(&self) -> usize {
        self.pending.len()
    }

    /// Starts the bounded probe pool, one task per device.
    ///
    /// The handle resolves once every probe has completed; at that point the
    /// announcement and unresolved queues are closed and ScanFinished is
    /// set. Probe failures are logged and counted, never fatal.
    pub fn run_probes(&mut self) -> Result<JoinHandle<ProbeStats>> {
        let announce = self
            .announce_tx
            .take()
            .ok_or(ScanError::Stage("probe stage already started"))?;
        let unresolved = self
            .unresolved_tx
            .take()
            .ok_or(ScanError::Stage("probe stage already started"))?;
        let resolved = self
            .resolved_tx
            .clone()
            .ok_or(ScanError::Stage("resolution started before probes"))?;

        let probe = Arc::new(DeviceNeighborProbe::new(
            self.factory.clone(),
            self.table.clone(),
            ProbeChannels {
                announce,
                resolved,
                unresolved,
            },
        ));
        let devices = std::mem::take(&mut self.devices);
        let scan_finished = self.scan_finished.clone();
        let capacity = self.settings.probe_capacity.max(1);

        Ok(tokio::spawn(async move {
            let admission = Arc::new(Semaphore::new(capacity));
            let mut pool = JoinSet::new();
            for device in devices {
                let permit = match admission.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed while the pool runs.
                    Err(_) => break,
                };
                let probe = probe.clone();
                pool.spawn(async move {
                    let address = device.management_address.clone();
                    let outcome = probe.scan(&device).await;
                    drop(permit);
                    if let Err(e) = &outcome {
                        warn!(device = %address, error = %e, "device probe failed");
                    }
                    outcome.is_ok()
                });
            }

            let mut stats = ProbeStats {
                probed: 0,
                failed: 0,
            };
            while let Some(joined) = pool.join_next().await {
                stats.probed += 1;
                match joined {
                    Ok(true) => {}
                    Ok(false) => stats.failed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!(error = %e, "probe task panicked");
                    }
                }
            }
            scan_finished.store(true, Ordering::SeqCst);
            // Dropping the probe closes the announcement and unresolved
            // queues and releases the probes' resolved sender.
            drop(probe);
            info!(
                probed = stats.probed,
                failed = stats.failed,
                "device scan finished"
            );
            stats
        }))
    }

    /// Starts the three resolution tasks: identity updater, first-pass
    /// resolver, and sweep resolver.
    ///
    /// The handle resolves once all three have terminated; the resolved
    /// queue closes when the last of the probes, the first-pass resolver and
    /// the sweep resolver has finished.
    pub fn run_resolution(&mut self) -> Result<JoinHandle<()>> {
        let mut announce_rx = self
            .announce_rx
            .take()
            .ok_or(ScanError::Stage("resolution stage already started"))?;
        let mut unresolved_rx = self
            .unresolved_rx
            .take()
            .ok_or(ScanError::Stage("resolution stage already started"))?;
        let resolved = self
            .resolved_tx
            .take()
            .ok_or(ScanError::Stage("resolution stage already started"))?;

        let table = self.table.clone();
        let updater = tokio::spawn(async move {
            while let Some(ChassisAnnouncement {
                chassis_id,
                address,
            }) = announce_rx.recv().await
            {
                if let Some(previous) = table.set(&chassis_id, &address) {
                    if previous != address {
                        warn!(
                            chassis = %chassis_id,
                            previous = %previous,
                            address = %address,
                            "chassis id announced by a second device, keeping the newer address"
                        );
                    }
                }
            }
            debug!("identity updater finished");
        });

        let table = self.table.clone();
        let pending = self.pending.clone();
        let first_pass_tx = resolved.clone();
        let first_pass = tokio::spawn(async move {
            while let Some(mut record) = unresolved_rx.recv().await {
                match record.chassis_id().and_then(|id| table.get(id)) {
                    Some(address) => {
                        record.resolve(address);
                        if first_pass_tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    None => pending.push(record),
                }
            }
            debug!("first-pass resolver finished");
        });

        let sweep = tokio::spawn(sweep_resolver(
            self.pending.clone(),
            self.table.clone(),
            self.scan_finished.clone(),
            resolved,
            self.settings.idle_epoch_limit,
            self.settings.sweep_backoff,
        ));

        Ok(tokio::spawn(async move {
            for (name, task) in [
                ("identity-updater", updater),
                ("first-pass-resolver", first_pass),
                ("sweep-resolver", sweep),
            ] {
                if let Err(e) = task.await {
                    error!(task = name, error = %e, "resolution task panicked");
                }
            }
        }))
    }

    /// Starts the result drain feeding `sink`, with `workers` saves in
    /// flight at most. Call after [`run_probes`](Self::run_probes) and
    /// [`run_resolution`](Self::run_resolution); the handle resolves once
    /// the resolved queue has been drained and the sink flushed.
    pub fn drain<S>(&mut self, sink: Arc<S>, workers: usize) -> Result<JoinHandle<DrainStats>>
    where
        S: NeighborSink + ?Sized + 'static,
    {
        let resolved_rx = self
            .resolved_rx
            .take()
            .ok_or(ScanError::Stage("drain stage already started"))?;
        // The orchestrator's own sender endpoint must not keep the resolved
        // queue open once probes and resolvers are done.
        drop(self.resolved_tx.take());
        Ok(tokio::spawn(ResultDrain::new(workers).run(resolved_rx, sink)))
    }
}

/// Sweep resolver: walks the pending registry against the chassis table
/// until the registry drains or the idle-epoch heuristic fires.
///
/// Empty walks count toward termination only once ScanFinished is set; an
/// empty registry mid-scan says nothing about the backlog still to come, so
/// every scan gets the full idle-epoch grace after its last probe.
async fn sweep_resolver(
    pending: Arc<PendingNeighborRegistry>,
    table: Arc<ChassisIdentityTable>,
    scan_finished: Arc<AtomicBool>,
    resolved: mpsc::Sender<NeighborRecord>,
    idle_epoch_limit: u32,
    sweep_backoff: Duration,
) {
    let mut idle_epochs = 0u32;
    loop {
        let batch = pending.sweep(|chassis_id| table.get(chassis_id));
        if batch.is_empty() {
            if scan_finished.load(Ordering::SeqCst) {
                idle_epochs += 1;
                if idle_epochs > idle_epoch_limit {
                    break;
                }
            }
            tokio::time::sleep(sweep_backoff).await;
        } else {
            // A productive sweep restarts the idle count and walks again
            // immediately.
            idle_epochs = 0;
            for record in batch {
                if resolved.send(record).await.is_err() {
                    return;
                }
            }
        }
    }
    debug!(still_pending = pending.len(), "sweep resolver finished");
}
