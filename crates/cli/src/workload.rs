//! Synthetic clients used to exercise a scheduler from the command line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use sharedthread_core::{NamedTrigger, Trigger};
use sharedthread_scheduler::{ClientHandle, SchedulerProxy};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A set of sleeping clients sharing one run counter.
pub struct Workload {
    triggers: Vec<Arc<dyn Trigger>>,
    runs: Arc<AtomicU64>,
    work: Duration,
}

impl Workload {
    pub fn new(clients: usize, work: Duration) -> Self {
        let runs = Arc::new(AtomicU64::new(0));
        let triggers = (0..clients)
            .map(|i| {
                let runs = Arc::clone(&runs);
                NamedTrigger::shared(format!("client-{i}"), move || {
                    thread::sleep(work);
                    runs.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
            })
            .collect();
        Self {
            triggers,
            runs,
            work,
        }
    }

    pub fn triggers(&self) -> &[Arc<dyn Trigger>] {
        &self.triggers
    }

    /// Completed runs across all clients.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn register(
        &self,
        service: &SchedulerProxy,
    ) -> sharedthread_core::Result<Vec<ClientHandle>> {
        self.triggers
            .iter()
            .map(|trigger| service.register(Arc::clone(trigger)))
            .collect()
    }

    /// Fire `rounds` activations per handle from the rayon pool.
    pub fn fire(handles: &[ClientHandle], rounds: usize) -> sharedthread_core::Result<usize> {
        let activations: Vec<&ClientHandle> = (0..rounds).flat_map(|_| handles.iter()).collect();
        activations.par_iter().try_for_each(|handle| handle.activate())?;
        Ok(activations.len())
    }

    /// Wait until the run counter stops moving, bounded by `deadline`.
    ///
    /// Returns the number of runs observed. The normal scheduler coalesces
    /// overlapping activations, so this can be lower than what was fired.
    pub fn settle(&self, deadline: Duration) -> u64 {
        let quiet = (self.work * 4).max(Duration::from_millis(100));
        let give_up = Instant::now() + deadline;
        let mut last = self.runs();
        let mut last_change = Instant::now();

        while Instant::now() < give_up {
            thread::sleep(POLL_INTERVAL);
            let now = self.runs();
            if now != last {
                last = now;
                last_change = Instant::now();
            } else if last_change.elapsed() >= quiet {
                debug!(runs = now, "workload settled");
                return now;
            }
        }
        warn!(runs = last, ?deadline, "workload still running at deadline");
        last
    }
}
