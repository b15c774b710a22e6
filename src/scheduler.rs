//! Periodic refresh with a single in-flight cycle.
//!
//! States: `Idle → Scheduled → Checking → Scheduled`. A check that arrives
//! while another is running is dropped, not queued. `stop()` only prevents
//! future cycles; a cycle already running finishes and commits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::MIN_REFRESH_INTERVAL;
use crate::pipeline::{CheckOutcome, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Checking,
}

/// Admission to a refresh cycle. Shared between the timer task and manual
/// checks so both go through the same in-progress flag.
#[derive(Clone)]
struct CycleGate {
    pipeline: Arc<Pipeline>,
    in_progress: Arc<AtomicBool>,
}

/// Clears the in-progress flag however the cycle ends.
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CycleGate {
    async fn run(&self) -> CheckOutcome {
        if !self.pipeline.store().is_loaded() {
            debug!("no cost record loaded yet, skipping check");
            return CheckOutcome::Skipped;
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already in progress, dropping check");
            return CheckOutcome::Skipped;
        }

        let _guard = InProgress(&self.in_progress);
        self.pipeline.run_cycle().await
    }
}

pub struct RefreshScheduler {
    gate: CycleGate,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl RefreshScheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            gate: CycleGate {
                pipeline,
                in_progress: Arc::new(AtomicBool::new(false)),
            },
            stop_tx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.gate.in_progress.load(Ordering::Acquire) {
            SchedulerState::Checking
        } else if self.is_scheduled() {
            SchedulerState::Scheduled
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.stop_tx.lock().is_some()
    }

    /// Begin polling: one check after `initial_delay`, then one every
    /// `interval` (at least [`MIN_REFRESH_INTERVAL`]). Returns false if
    /// already scheduled. Must be called inside a tokio runtime.
    pub fn start(&self, interval: Duration, initial_delay: Duration) -> bool {
        let mut stop_tx = self.stop_tx.lock();
        if stop_tx.is_some() {
            return false;
        }

        let interval = interval.max(MIN_REFRESH_INTERVAL);
        let (tx, rx) = watch::channel(false);
        tokio::spawn(run_schedule(self.gate.clone(), interval, initial_delay, rx));
        *stop_tx = Some(tx);

        info!(
            interval_ms = interval.as_millis() as u64,
            initial_delay_ms = initial_delay.as_millis() as u64,
            "auto-refresh enabled"
        );
        true
    }

    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
            info!("auto-refresh stopped");
        }
    }

    /// Run a cycle now unless one is already in flight.
    pub async fn check_now(&self) -> CheckOutcome {
        self.gate.run().await
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(
    gate: CycleGate,
    interval: Duration,
    initial_delay: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::select! {
        _ = sleep(initial_delay) => {
            gate.run().await;
        }
        _ = stop_rx.changed() => return,
    }

    loop {
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                gate.run().await;
            }
            _ = stop_rx.changed() => break,
        }
    }
    debug!("refresh loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::DerivationEngine;
    use crate::format::ValueKind;
    use crate::render::{Binding, BindingRenderer, MemorySurface};
    use crate::source::testing::{GatedSource, ScriptedSource};
    use crate::source::{RecordSource, SourceLoader};

    const V1: &str = r#"{"slides":{"s":{"total":100}}}"#;
    const V2: &str = r#"{"slides":{"s":{"total":200}}}"#;

    fn build(remote: Arc<dyn RecordSource>) -> (Arc<Pipeline>, Arc<MemorySurface>) {
        let surface = Arc::new(MemorySurface::new());
        let pipeline = Pipeline::new(
            SourceLoader::new(remote, None, None),
            DerivationEngine::default(),
            BindingRenderer::new(surface.clone()),
            vec![Binding::new("total", "s", "total", ValueKind::Currency)],
        );
        (Arc::new(pipeline), surface)
    }

    #[tokio::test]
    async fn test_check_before_first_load_is_skipped() {
        let remote = Arc::new(ScriptedSource::new(vec![Ok(V1.into())]));
        let (pipeline, _surface) = build(remote.clone());
        let scheduler = RefreshScheduler::new(pipeline);

        assert!(matches!(scheduler.check_now().await, CheckOutcome::Skipped));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overlapping_check_is_dropped() {
        let remote = Arc::new(GatedSource::new(vec![Ok(V1.into()), Ok(V2.into())]));
        let (pipeline, surface) = build(remote.clone());
        pipeline.load_and_accept(false).await.unwrap();
        let writes_after_load = surface.writes();

        let scheduler = Arc::new(RefreshScheduler::new(pipeline.clone()));
        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.check_now().await }
        });
        while scheduler.state() != SchedulerState::Checking {
            tokio::task::yield_now().await;
        }

        assert!(matches!(scheduler.check_now().await, CheckOutcome::Skipped));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);

        remote.release.notify_one();
        let outcome = first.await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Updated { rendered: 1, .. }));
        assert_eq!(surface.writes(), writes_after_load + 1);
        assert_eq!(pipeline.store().commits(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_initial_check_then_interval() {
        let remote = Arc::new(ScriptedSource::new(vec![Ok(V1.into())]));
        let (pipeline, _surface) = build(remote.clone());
        pipeline.load_and_accept(false).await.unwrap();

        let scheduler = RefreshScheduler::new(pipeline);
        assert!(scheduler.start(Duration::from_secs(5), Duration::from_secs(1)));
        assert!(!scheduler.start(Duration::from_secs(5), Duration::from_secs(1)));
        assert_eq!(scheduler.state(), SchedulerState::Scheduled);

        sleep(Duration::from_millis(900)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 3);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 4);

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_cycle_commit() {
        let remote = Arc::new(GatedSource::new(vec![Ok(V1.into()), Ok(V2.into())]));
        let (pipeline, surface) = build(remote.clone());
        pipeline.load_and_accept(false).await.unwrap();
        assert_eq!(surface.text("total").as_deref(), Some("$100"));

        let scheduler = RefreshScheduler::new(pipeline.clone());
        scheduler.start(Duration::from_secs(5), Duration::from_secs(1));

        // the initial check is now parked inside its fetch
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(scheduler.state(), SchedulerState::Checking);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Checking);

        remote.release.notify_one();
        while scheduler.state() != SchedulerState::Idle {
            tokio::task::yield_now().await;
        }
        assert_eq!(pipeline.store().commits(), 2);
        assert_eq!(surface.text("total").as_deref(), Some("$200"));

        sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_floor_is_enforced() {
        let remote = Arc::new(ScriptedSource::new(vec![Ok(V1.into())]));
        let (pipeline, _surface) = build(remote.clone());
        pipeline.load_and_accept(false).await.unwrap();

        let scheduler = RefreshScheduler::new(pipeline);
        scheduler.start(Duration::from_millis(10), Duration::ZERO);

        sleep(Duration::from_millis(500)).await;
        // initial load + immediate first check
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 3);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let remote = Arc::new(ScriptedSource::new(vec![Ok(V1.into())]));
        let (pipeline, _surface) = build(remote.clone());
        pipeline.load_and_accept(false).await.unwrap();

        let scheduler = RefreshScheduler::new(pipeline);
        assert!(scheduler.start(Duration::from_secs(2), Duration::from_secs(1)));
        scheduler.stop();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);

        assert!(scheduler.start(Duration::from_secs(2), Duration::from_secs(1)));
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);
    }
}
