//! Persistence feeding stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use topo_types::{NeighborRecord, NeighborSink};
use tracing::{debug, error, warn};

/// Counters reported by the drain when the resolved queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub saved: u64,
    pub failed: u64,
}

/// Forwards resolved neighbor records to the persistence sink.
///
/// Saves are admission-gated by a semaphore of `capacity` permits. The
/// default capacity of one serializes all saves, which lets a batching sink
/// keep a transaction counter without cross-task races; a wider pool trades
/// that for throughput. A failed save is logged and the drain continues, one
/// bad record never aborts persistence.
pub struct ResultDrain {
    capacity: usize,
}

impl ResultDrain {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    /// Consumes `records` until the channel closes, then flushes the sink.
    pub async fn run<S>(self, mut records: mpsc::Receiver<NeighborRecord>, sink: Arc<S>) -> DrainStats
    where
        S: NeighborSink + ?Sized + 'static,
    {
        let admission = Arc::new(Semaphore::new(self.capacity));
        let saved = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let mut pool = JoinSet::new();

        while let Some(record) = records.recv().await {
            let permit = match admission.clone().acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed while the drain runs.
                Err(_) => break,
            };
            let sink = sink.clone();
            let saved = saved.clone();
            let failed = failed.clone();
            pool.spawn(async move {
                match sink.save(&record).await {
                    Ok(()) => {
                        saved.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            local = %record.local_address,
                            error = %e,
                            "failed to persist neighbor record"
                        );
                    }
                }
                drop(permit);
            });
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "save task panicked");
            }
        }

        if let Err(e) = sink.flush().await {
            error!(error = %e, "sink flush failed");
        }

        let stats = DrainStats {
            saved: saved.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };
        debug!(saved = stats.saved, failed = stats.failed, "result drain finished");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;

    fn resolved_record(local: &str, remote: &str, port: &str) -> NeighborRecord {
        let mut record = NeighborRecord::unresolved(local, "aabbccddee99");
        record.push_pair(port, "peer");
        record.resolve(remote.to_string());
        record
    }

    #[tokio::test]
    async fn test_drains_until_channel_closes_and_flushes() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::new());
        let drain = tokio::spawn(ResultDrain::new(1).run(rx, sink.clone()));

        for i in 0..5 {
            let record = resolved_record("10.0.0.1", "10.0.0.2", &format!("GE1/0/{i}"));
            tx.send(record).await.unwrap();
        }
        drop(tx);

        let stats = drain.await.unwrap();
        assert_eq!(stats, DrainStats { saved: 5, failed: 0 });
        assert_eq!(sink.records().len(), 5);
        assert_eq!(sink.flushes(), 1);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_record_order() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::new());
        let drain = tokio::spawn(ResultDrain::new(1).run(rx, sink.clone()));

        for i in 0..10 {
            tx.send(resolved_record("10.0.0.1", "10.0.0.2", &format!("p{i}")))
                .await
                .unwrap();
        }
        drop(tx);
        drain.await.unwrap();

        let ports: Vec<String> = sink
            .records()
            .iter()
            .map(|r| r.local_ports[0].clone())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
        assert_eq!(ports, expected);
    }

    #[tokio::test]
    async fn test_save_errors_do_not_stop_the_drain() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::failing_first(2));
        let drain = tokio::spawn(ResultDrain::new(1).run(rx, sink.clone()));

        for i in 0..4 {
            tx.send(resolved_record("10.0.0.1", "10.0.0.2", &format!("p{i}")))
                .await
                .unwrap();
        }
        drop(tx);

        let stats = drain.await.unwrap();
        assert_eq!(stats, DrainStats { saved: 2, failed: 2 });
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.flushes(), 1);
    }
}
