//! Background health checks and periodic statistics dumps.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use sharedthread_core::{Result, SchedulerError};
use tracing::{debug, info, warn};

use crate::statistics::StatisticsRegistry;
use crate::worker::Worker;

/// How often the watcher wakes up.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum time between two statistics dumps.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(120);

pub const WATCHER_THREAD_NAME: &str = "SchedulerService.Watcher";

/// What the watcher does on each tick.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Run health checks on registered workers.
    pub watching: bool,
    /// Dump statistics to `report_path` (only when statistics are kept).
    pub dumping: bool,
    pub report_path: PathBuf,
}

/// Scans workers for stuck triggers and dumps statistics.
///
/// Workers are held weakly; dropped workers fall out of the scan.
#[derive(Debug)]
pub struct Watcher {
    settings: WatcherSettings,
    statistics: Option<Arc<StatisticsRegistry>>,
    workers: Mutex<Vec<Weak<Worker>>>,
    last_report: Mutex<Option<Instant>>,
}

impl Watcher {
    pub fn new(settings: WatcherSettings, statistics: Option<Arc<StatisticsRegistry>>) -> Self {
        Self {
            settings,
            statistics,
            workers: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
        }
    }

    /// Create a watcher and start its background thread. The thread exits
    /// once the returned watcher is dropped.
    pub fn spawn(
        settings: WatcherSettings,
        statistics: Option<Arc<StatisticsRegistry>>,
    ) -> Result<Arc<Self>> {
        let watcher = Arc::new(Self::new(settings, statistics));
        let weak = Arc::downgrade(&watcher);
        thread::Builder::new()
            .name(WATCHER_THREAD_NAME.to_string())
            .spawn(move || Self::run(weak))
            .map_err(|source| SchedulerError::ThreadSpawn {
                name: WATCHER_THREAD_NAME.to_string(),
                source,
            })?;
        info!(
            watching = watcher.settings.watching,
            dumping = watcher.settings.dumping,
            "scheduler watcher started"
        );
        Ok(watcher)
    }

    fn run(weak: Weak<Self>) {
        loop {
            thread::sleep(WATCH_INTERVAL);
            let Some(watcher) = weak.upgrade() else {
                debug!("scheduler watcher released, exiting");
                return;
            };
            watcher.tick(Instant::now());
        }
    }

    pub fn register(&self, worker: &Arc<Worker>) {
        self.lock_workers().push(Arc::downgrade(worker));
    }

    /// Number of live workers being watched.
    pub fn worker_count(&self) -> usize {
        self.lock_workers()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// One watcher cycle: health check, then a dump if one is due.
    pub fn tick(&self, now: Instant) {
        if self.settings.watching {
            self.check(now);
        }
        if self.report_due(now) {
            if let Err(e) = self.report() {
                warn!(
                    path = %self.settings.report_path.display(),
                    error = %e,
                    "failed to write scheduler statistics"
                );
            }
        }
    }

    /// Check every live worker. Returns how many were flagged.
    pub fn check(&self, now: Instant) -> usize {
        let live: Vec<Arc<Worker>> = {
            let mut workers = self.lock_workers();
            workers.retain(|w| w.strong_count() > 0);
            workers.iter().filter_map(Weak::upgrade).collect()
        };
        live.iter()
            .filter(|worker| worker.check_health_at(now).is_some())
            .count()
    }

    fn report_due(&self, now: Instant) -> bool {
        if !self.settings.dumping || self.statistics.is_none() {
            return false;
        }
        let mut last = self.last_report.lock().unwrap_or_else(PoisonError::into_inner);
        let due = match *last {
            Some(at) => now.saturating_duration_since(at) >= REPORT_INTERVAL,
            None => true,
        };
        if due {
            *last = Some(now);
        }
        due
    }

    /// Write the statistics file now.
    pub fn report(&self) -> Result<()> {
        let Some(statistics) = &self.statistics else {
            return Ok(());
        };
        statistics.dump_to(&self.settings.report_path)?;
        debug!(
            path = %self.settings.report_path.display(),
            entries = statistics.len(),
            "scheduler statistics written"
        );
        Ok(())
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<Weak<Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
