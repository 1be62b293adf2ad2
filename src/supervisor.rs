// THEORY:
// The `ZoneSupervisor` owns the worker pool of the engine: one blocking task per
// camera zone, each running a `ZoneOccupancyLoop` to completion or cancellation.
// Workers never talk to each other; they only share the store handle.
//
// Cancellation is hierarchical. Every zone gets a child of the supervisor's root
// token, so a single zone can be stopped on its own while `stop_all` reaches every
// zone through the root. Stopping is cooperative: a loop notices its token at the
// top of its next iteration, so `stop_all` waits for a bounded grace period and
// reports the zones that did not make it.

use crate::core_modules::occupancy::ZoneId;
use crate::frame_source::FrameSourceProvider;
use crate::slot_layout::SlotLayoutProvider;
use crate::zone_loop::{LoopConfig, LoopExit, run_zone};
use crate::zone_store::{LoopPhase, ZoneStateStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct ZoneWorker {
    cancel: CancellationToken,
    handle: JoinHandle<LoopExit>,
}

/// Outcome of `stop_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Zones that reached `Stopped`, with the reason.
    pub exits: HashMap<ZoneId, LoopExit>,
    /// Zones still running when the grace period ran out.
    pub timed_out: Vec<ZoneId>,
    /// Zones whose worker panicked.
    pub failed: Vec<ZoneId>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty()
    }
}

/// Launches and stops per-zone occupancy loops.
pub struct ZoneSupervisor {
    store: ZoneStateStore,
    layouts: Arc<dyn SlotLayoutProvider>,
    sources: Arc<dyn FrameSourceProvider>,
    config: LoopConfig,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<ZoneId, ZoneWorker>>,
}

impl ZoneSupervisor {
    pub fn new(
        store: ZoneStateStore,
        layouts: Arc<dyn SlotLayoutProvider>,
        sources: Arc<dyn FrameSourceProvider>,
        config: LoopConfig,
    ) -> Self {
        Self {
            store,
            layouts,
            sources,
            config,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ZoneStateStore {
        &self.store
    }

    /// Launches the occupancy loop of a zone on the blocking pool. Returns `false`
    /// if the zone is already running or the supervisor has been shut down. Must
    /// be called from within a tokio runtime.
    pub fn start(&self, zone_id: ZoneId) -> bool {
        if self.shutdown.is_cancelled() {
            warn!(zone_id, "supervisor is shut down, not starting zone");
            return false;
        }

        let mut workers = self.workers.lock();
        if workers.get(&zone_id).is_some_and(|worker| !worker.handle.is_finished()) {
            warn!(zone_id, "zone occupancy loop already running");
            return false;
        }

        // Registered before the worker runs; readers see `Starting` until the
        // loop takes over.
        self.store.register(zone_id);
        self.store.set_phase(zone_id, LoopPhase::Starting);

        let cancel = self.shutdown.child_token();
        let worker_cancel = cancel.clone();
        let layouts = self.layouts.clone();
        let sources = self.sources.clone();
        let store = self.store.clone();
        let config = self.config.clone();

        let handle = tokio::task::spawn_blocking(move || {
            run_zone(zone_id, layouts.as_ref(), sources.as_ref(), store, config, &worker_cancel)
        });

        workers.insert(zone_id, ZoneWorker { cancel, handle });
        info!(zone_id, "zone occupancy loop launched");
        true
    }

    /// Zones with a worker that has not finished yet.
    pub fn running_zones(&self) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = self
            .workers
            .lock()
            .iter()
            .filter(|(_, worker)| !worker.handle.is_finished())
            .map(|(zone_id, _)| *zone_id)
            .collect();
        zones.sort_unstable();
        zones
    }

    /// Cancels a single zone and waits up to `grace` for its loop to stop.
    pub async fn stop(&self, zone_id: ZoneId, grace: Duration) -> Option<LoopExit> {
        let worker = self.workers.lock().remove(&zone_id)?;
        worker.cancel.cancel();

        match tokio::time::timeout(grace, worker.handle).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                error!(zone_id, error = %e, "zone occupancy worker failed");
                None
            }
            Err(_) => {
                warn!(zone_id, "zone occupancy loop did not stop within grace period");
                None
            }
        }
    }

    /// Signals every zone and waits until all loops stopped or `grace` elapsed.
    pub async fn stop_all(&self, grace: Duration) -> StopReport {
        self.shutdown.cancel();

        let workers: Vec<(ZoneId, ZoneWorker)> = self.workers.lock().drain().collect();
        let deadline = tokio::time::Instant::now() + grace;
        let waits = workers.into_iter().map(|(zone_id, worker)| async move {
            (zone_id, tokio::time::timeout_at(deadline, worker.handle).await)
        });

        let mut report = StopReport::default();
        for (zone_id, outcome) in futures::future::join_all(waits).await {
            match outcome {
                Ok(Ok(exit)) => {
                    report.exits.insert(zone_id, exit);
                }
                Ok(Err(e)) => {
                    error!(zone_id, error = %e, "zone occupancy worker failed");
                    report.failed.push(zone_id);
                }
                Err(_) => {
                    warn!(zone_id, "zone occupancy loop did not stop within grace period");
                    report.timed_out.push(zone_id);
                }
            }
        }
        report.timed_out.sort_unstable();
        report.failed.sort_unstable();

        info!(
            stopped = report.exits.len(),
            timed_out = report.timed_out.len(),
            "zone supervisor shut down"
        );
        report
    }
}
