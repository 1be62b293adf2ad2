// THEORY:
// The `ZoneOccupancyLoop` drives one zone from raw video to published occupancy.
// It is the only writer of its zone's entry in the `ZoneStateStore`.
//
// Lifecycle:
// - **Starting**: load the slot layout and open the frame source. Either failing
//   is fatal for this zone only. The store entry keeps its default state.
// - **Running**: read a frame (rewinding recorded clips at the end), build the
//   occupancy mask, classify slots, publish, sleep. Cancellation is checked once
//   per iteration at the top, before the next frame is pulled, so a stop request
//   takes effect within one sleep interval plus one frame's processing time.
// - **Stopping / Stopped**: release the frame source; no further publications.
//
// The loop is synchronous and CPU-bound. It is meant to run on a blocking thread,
// never on an async worker.

use crate::core_modules::mask::{Frame, occupancy_mask};
use crate::core_modules::occupancy::{ZoneId, ZoneOccupancyState};
use crate::core_modules::slot_classifier::slot_classifier::count_free_slots;
use crate::core_modules::slot_region::SlotRegion;
use crate::error::{FrameSourceError, ZoneError};
use crate::frame_source::{FrameSource, FrameSourceProvider};
use crate::slot_layout::SlotLayoutProvider;
use crate::zone_store::{LoopPhase, ZoneStateStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(30);
const DEFAULT_MAX_CONSECUTIVE_READ_FAILURES: u32 = 100;

/// Tunables of a zone loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause after every iteration. Bounds CPU use and approximates playback speed.
    pub frame_interval: Duration,
    /// Consecutive failed reads after which the source is treated as disconnected.
    pub max_consecutive_read_failures: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            max_consecutive_read_failures: DEFAULT_MAX_CONSECUTIVE_READ_FAILURES,
        }
    }
}

/// Why a zone loop reached `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The zone's cancellation token was triggered.
    Cancelled,
    /// The frame source ended and could not wrap around.
    SourceExhausted,
    /// Layout or frame source could not be opened.
    StartupFailed,
}

/// A started zone loop: layout loaded and frame source open.
pub struct ZoneOccupancyLoop {
    zone_id: ZoneId,
    layout: Vec<SlotRegion>,
    source: Box<dyn FrameSource>,
    store: ZoneStateStore,
    config: LoopConfig,
    consecutive_failures: u32,
}

impl ZoneOccupancyLoop {
    /// Performs the `Starting` phase.
    pub fn start(
        zone_id: ZoneId,
        layouts: &dyn SlotLayoutProvider,
        sources: &dyn FrameSourceProvider,
        store: ZoneStateStore,
        config: LoopConfig,
    ) -> Result<Self, ZoneError> {
        store.register(zone_id);
        store.set_phase(zone_id, LoopPhase::Starting);

        let layout = layouts
            .load_layout(zone_id)
            .map_err(|e| ZoneError::ConfigurationMissing {
                zone_id,
                reason: e.to_string(),
            })?;
        let source = sources.open(zone_id).map_err(|e| ZoneError::ConfigurationMissing {
            zone_id,
            reason: e.to_string(),
        })?;

        Ok(Self {
            zone_id,
            layout,
            source,
            store,
            config,
            consecutive_failures: 0,
        })
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    pub fn layout(&self) -> &[SlotRegion] {
        &self.layout
    }

    /// Estimates occupancy for a single frame without publishing it.
    pub fn process_frame(&self, frame: &Frame) -> ZoneOccupancyState {
        let mask = occupancy_mask(frame);
        let free_slots = count_free_slots(&mask, &self.layout);
        ZoneOccupancyState::from_counts(self.layout.len() as u32, free_slots)
    }

    /// One iteration of the `Running` phase without the sleep: read, process and
    /// publish. A `TransientReadFailure` leaves the store untouched.
    pub fn step(&mut self) -> Result<ZoneOccupancyState, ZoneError> {
        let frame = match self.next_frame() {
            Ok(frame) => frame,
            Err(ZoneError::TransientReadFailure { zone_id, reason }) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.max_consecutive_read_failures {
                    warn!(zone_id, failures = self.consecutive_failures, "frame source treated as disconnected");
                    return Err(ZoneError::SourceExhausted { zone_id });
                }
                return Err(ZoneError::TransientReadFailure { zone_id, reason });
            }
            Err(other) => return Err(other),
        };
        self.consecutive_failures = 0;

        let state = self.process_frame(&frame);
        self.store.publish(self.zone_id, state);
        Ok(state)
    }

    /// Runs until cancelled or until the source is exhausted, then releases the
    /// source. Blocks the calling thread.
    pub fn run(mut self, cancel: &CancellationToken) -> LoopExit {
        let zone_id = self.zone_id;
        self.store.set_phase(zone_id, LoopPhase::Running);
        info!(zone_id, slots = self.layout.len(), "zone occupancy loop running");

        let exit = loop {
            if cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            match self.step() {
                Ok(state) => {
                    trace!(zone_id, free_slots = state.free_slots, status = ?state.status, "published");
                }
                Err(ZoneError::TransientReadFailure { reason, .. }) => {
                    warn!(zone_id, %reason, "frame read failed, skipping iteration");
                }
                Err(e) => {
                    warn!(zone_id, error = %e, "zone occupancy loop cannot continue");
                    break LoopExit::SourceExhausted;
                }
            }

            std::thread::sleep(self.config.frame_interval);
        };

        self.store.set_phase(zone_id, LoopPhase::Stopping);
        self.source.close();
        self.store.set_phase(zone_id, LoopPhase::Stopped);
        info!(zone_id, ?exit, "zone occupancy loop stopped");
        exit
    }

    fn next_frame(&mut self) -> Result<Frame, ZoneError> {
        match self.source.read_next() {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) => {}
            Err(e) => return Err(self.transient(e)),
        }

        // --- End of stream: rewind recorded clips ---
        debug!(zone_id = self.zone_id, "end of stream, rewinding");
        if let Err(e) = self.source.seek_to_start() {
            debug!(zone_id = self.zone_id, error = %e, "rewind failed");
            return Err(ZoneError::SourceExhausted { zone_id: self.zone_id });
        }

        match self.source.read_next() {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ZoneError::SourceExhausted { zone_id: self.zone_id }),
            Err(e) => Err(self.transient(e)),
        }
    }

    fn transient(&self, e: FrameSourceError) -> ZoneError {
        ZoneError::TransientReadFailure {
            zone_id: self.zone_id,
            reason: e.to_string(),
        }
    }
}

/// Starts and runs one zone loop to completion. Startup failures are logged and
/// leave the zone's store entry at its default state.
pub fn run_zone(
    zone_id: ZoneId,
    layouts: &dyn SlotLayoutProvider,
    sources: &dyn FrameSourceProvider,
    store: ZoneStateStore,
    config: LoopConfig,
    cancel: &CancellationToken,
) -> LoopExit {
    match ZoneOccupancyLoop::start(zone_id, layouts, sources, store.clone(), config) {
        Ok(zone_loop) => zone_loop.run(cancel),
        Err(e) => {
            error!(zone_id, error = %e, "zone occupancy loop failed to start");
            store.set_phase(zone_id, LoopPhase::Stopped);
            LoopExit::StartupFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::occupancy::ZoneStatus;
    use crate::frame_source::{MemoryFrameProvider, MemoryFrameSource};
    use crate::slot_layout::StaticLayoutProvider;
    use crate::test_support::{eight_slot_layout, parking_frame};
    use std::sync::atomic::Ordering;

    const ZONE: ZoneId = 1;

    fn fast_config() -> LoopConfig {
        LoopConfig {
            frame_interval: Duration::from_millis(1),
            max_consecutive_read_failures: 3,
        }
    }

    fn providers(source: MemoryFrameSource) -> (StaticLayoutProvider, MemoryFrameProvider) {
        let mut layouts = StaticLayoutProvider::new();
        layouts.insert(ZONE, eight_slot_layout());
        let mut sources = MemoryFrameProvider::new();
        sources.insert(ZONE, source);
        (layouts, sources)
    }

    fn frames(occupied: &[usize]) -> Vec<Frame> {
        let layout = eight_slot_layout();
        occupied.iter().map(|&n| parking_frame(&layout, n)).collect()
    }

    #[test]
    fn missing_layout_fails_startup_and_keeps_default_state() {
        let store = ZoneStateStore::new();
        let layouts = StaticLayoutProvider::new();
        let (_, sources) = providers(MemoryFrameSource::new(frames(&[0])));

        let result = ZoneOccupancyLoop::start(ZONE, &layouts, &sources, store.clone(), fast_config());
        assert!(matches!(result, Err(ZoneError::ConfigurationMissing { zone_id: ZONE, .. })));
        assert_eq!(store.read(ZONE), ZoneOccupancyState::default());
    }

    #[test]
    fn missing_source_fails_startup() {
        let store = ZoneStateStore::new();
        let (layouts, _) = providers(MemoryFrameSource::new(Vec::new()));
        let sources = MemoryFrameProvider::new();

        let exit = run_zone(ZONE, &layouts, &sources, store.clone(), fast_config(), &CancellationToken::new());
        assert_eq!(exit, LoopExit::StartupFailed);
        assert_eq!(store.phase(ZONE), Some(LoopPhase::Stopped));
        assert_eq!(store.read(ZONE).status, ZoneStatus::Unknown);
    }

    #[test]
    fn step_publishes_classified_state() {
        let store = ZoneStateStore::new();
        let (layouts, sources) = providers(MemoryFrameSource::new(frames(&[0, 6, 8])));
        let mut zone_loop =
            ZoneOccupancyLoop::start(ZONE, &layouts, &sources, store.clone(), fast_config()).expect("start");

        let state = zone_loop.step().expect("step");
        assert_eq!((state.free_slots, state.status), (8, ZoneStatus::Available));
        assert_eq!(store.read(ZONE), state);

        let state = zone_loop.step().expect("step");
        assert_eq!((state.free_slots, state.status), (2, ZoneStatus::Filling));

        let state = zone_loop.step().expect("step");
        assert_eq!((state.free_slots, state.status), (0, ZoneStatus::Full));
        assert_eq!(store.read(ZONE).total_slots, 8);
    }

    #[test]
    fn recorded_clip_wraps_around_to_first_frame() {
        let store = ZoneStateStore::new();
        let (layouts, sources) = providers(MemoryFrameSource::new(frames(&[0, 6])));
        let mut zone_loop =
            ZoneOccupancyLoop::start(ZONE, &layouts, &sources, store.clone(), fast_config()).expect("start");

        assert_eq!(zone_loop.step().expect("first").free_slots, 8);
        assert_eq!(zone_loop.step().expect("second").free_slots, 2);
        assert_eq!(zone_loop.step().expect("wrapped").free_slots, 8);
        assert_eq!(zone_loop.step().expect("second again").free_slots, 2);
    }

    #[test]
    fn live_source_without_seek_is_exhausted() {
        let store = ZoneStateStore::new();
        let (layouts, sources) = providers(MemoryFrameSource::new(frames(&[6])).without_seek());
        let mut zone_loop =
            ZoneOccupancyLoop::start(ZONE, &layouts, &sources, store.clone(), fast_config()).expect("start");

        zone_loop.step().expect("first frame");
        assert!(matches!(zone_loop.step(), Err(ZoneError::SourceExhausted { zone_id: ZONE })));
        assert_eq!(store.read(ZONE).free_slots, 2);
    }

    #[test]
    fn transient_failure_skips_one_iteration() {
        let store = ZoneStateStore::new();
        let layout = eight_slot_layout();
        let source = MemoryFrameSource::new(vec![parking_frame(&layout, 0)])
            .with_read_failure()
            .with_frame(parking_frame(&layout, 8));
        let (layouts, sources) = providers(source);
        let mut zone_loop =
            ZoneOccupancyLoop::start(ZONE, &layouts, &sources, store.clone(), fast_config()).expect("start");

        assert_eq!(zone_loop.step().expect("first").free_slots, 8);
        assert!(matches!(zone_loop.step(), Err(ZoneError::TransientReadFailure { .. })));
        assert_eq!(store.read(ZONE).free_slots, 8);
        assert_eq!(zone_loop.step().expect("third").free_slots, 0);
    }

    #[test]
    fn repeated_failures_are_treated_as_disconnect() {
        let store = ZoneStateStore::new();
        let source = MemoryFrameSource::new(Vec::new())
            .with_read_failure()
            .with_read_failure()
            .with_read_failure();
        let (layouts, sources) = providers(source);
        let mut zone_loop =
            ZoneOccupancyLoop::start(ZONE, &layouts, &sources, store, fast_config()).expect("start");

        assert!(matches!(zone_loop.step(), Err(ZoneError::TransientReadFailure { .. })));
        assert!(matches!(zone_loop.step(), Err(ZoneError::TransientReadFailure { .. })));
        assert!(matches!(zone_loop.step(), Err(ZoneError::SourceExhausted { .. })));
    }

    #[test]
    fn cancelled_loop_stops_before_reading_and_closes_source() {
        let store = ZoneStateStore::new();
        let source = MemoryFrameSource::new(frames(&[3]));
        let closed = source.closed_flag();
        let (layouts, sources) = providers(source);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let exit = run_zone(ZONE, &layouts, &sources, store.clone(), fast_config(), &cancel);

        assert_eq!(exit, LoopExit::Cancelled);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(store.phase(ZONE), Some(LoopPhase::Stopped));
        assert!(store.snapshot(ZONE).expect("snapshot").published_at.is_none());
    }

    #[test]
    fn exhausted_loop_keeps_last_state() {
        let store = ZoneStateStore::new();
        let (layouts, sources) = providers(MemoryFrameSource::new(frames(&[0, 7])).without_seek());

        let exit = run_zone(ZONE, &layouts, &sources, store.clone(), fast_config(), &CancellationToken::new());

        assert_eq!(exit, LoopExit::SourceExhausted);
        let snapshot = store.snapshot(ZONE).expect("snapshot");
        assert_eq!(snapshot.state.free_slots, 1);
        assert_eq!(snapshot.state.status, ZoneStatus::Filling);
        assert!(snapshot.is_stale());
    }

    #[test]
    fn cancellation_from_another_thread_stops_running_loop() {
        let store = ZoneStateStore::new();
        let (layouts, sources) = providers(MemoryFrameSource::new(frames(&[4])));
        let cancel = CancellationToken::new();

        let exit = std::thread::scope(|scope| {
            let worker = scope.spawn(|| run_zone(ZONE, &layouts, &sources, store.clone(), fast_config(), &cancel));
            while store.snapshot(ZONE).and_then(|s| s.published_at).is_none() {
                std::thread::sleep(Duration::from_millis(1));
            }
            cancel.cancel();
            worker.join().expect("zone loop thread")
        });

        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(store.read(ZONE).free_slots, 4);
        assert_eq!(store.phase(ZONE), Some(LoopPhase::Stopped));
    }
}
