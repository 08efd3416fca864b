// Periodic reconcile driver
//
// The engine itself is synchronous. This service owns the tokio task that
// ticks `reconcile()` on the blocking pool so session enumeration never
// stalls the async runtime.

use colored::Colorize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::engine::SyncEngine;
use crate::sync_debug;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

pub struct SyncService {
    should_stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    passes: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Spawn the reconcile loop on the current runtime. The first pass runs
    /// immediately.
    pub fn start(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let should_stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let passes = Arc::new(AtomicU64::new(0));

        let task_stop = should_stop.clone();
        let task_wake = wake.clone();
        let task_passes = passes.clone();

        let handle = tokio::spawn(async move {
            info!(
                "{}: every {} ms",
                "SYNC_SERVICE_STARTED".green(),
                interval.as_millis()
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !task_stop.load(Ordering::Relaxed) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = task_wake.notified() => continue,
                }

                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.reconcile()).await {
                    Ok(()) => {
                        let n = task_passes.fetch_add(1, Ordering::Relaxed) + 1;
                        sync_debug!("reconcile pass {} complete", n);
                    }
                    Err(e) if e.is_panic() => {
                        error!("{}: {}", "RECONCILE_PANICKED".red(), e);
                    }
                    Err(e) => {
                        warn!("reconcile pass cancelled: {}", e);
                    }
                }
            }

            info!("{}", "SYNC_SERVICE_STOPPED".yellow());
        });

        Self {
            should_stop,
            wake,
            passes,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Start with the interval from the engine's `reconcile_interval_ms` setting
    pub fn start_from_settings(engine: Arc<SyncEngine>) -> Self {
        let interval = engine.reconcile_interval();
        Self::start(engine, interval)
    }

    /// Completed reconcile passes so far
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// Stop the loop and wait for an in-flight pass to finish
    pub async fn stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
        self.wake.notify_one();

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Sync service task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }
}
