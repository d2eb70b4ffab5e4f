//! Trigger execution with fault isolation, timing and health reporting.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sharedthread_core::Trigger;
use tracing::{debug, error, warn};

use crate::statistics::StatisticsRegistry;

/// The trigger a worker is running right now.
#[derive(Debug, Clone)]
struct InFlight {
    label: String,
    started: Instant,
}

/// Runs triggers on behalf of a scheduler thread.
///
/// A worker never lets a trigger failure escape: errors and panics are
/// logged and reported through the return value of [`run_trigger`], so one
/// misbehaving client cannot take down a shared thread.
///
/// [`run_trigger`]: Worker::run_trigger
#[derive(Debug)]
pub struct Worker {
    name: String,
    current: Mutex<Option<InFlight>>,
    statistics: Option<Arc<StatisticsRegistry>>,
    warning_time: Duration,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        statistics: Option<Arc<StatisticsRegistry>>,
        warning_time: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            current: Mutex::new(None),
            statistics,
            warning_time,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `trigger` once. Returns `true` if it failed.
    pub fn run_trigger(&self, trigger: &Arc<dyn Trigger>) -> bool {
        let label = trigger.describe();
        let started = Instant::now();
        self.set_current(Some(InFlight {
            label: label.clone(),
            started,
        }));

        let failed = match panic::catch_unwind(AssertUnwindSafe(|| trigger.trigger())) {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!(worker = %self.name, trigger = %label, error = ?e, "trigger failed");
                true
            }
            Err(payload) => {
                error!(
                    worker = %self.name,
                    trigger = %label,
                    panic = %panic_message(payload.as_ref()),
                    "trigger panicked"
                );
                true
            }
        };

        let elapsed = started.elapsed();
        if let Some(stats) = &self.statistics {
            stats.accumulate(trigger, saturating_millis(elapsed));
        }
        self.set_current(None);
        debug!(worker = %self.name, trigger = %label, ?elapsed, failed, "trigger finished");
        failed
    }

    /// How long the current trigger has been running, if any.
    pub fn running_for(&self, now: Instant) -> Option<Duration> {
        self.lock_current()
            .as_ref()
            .map(|f| now.saturating_duration_since(f.started))
    }

    pub fn is_idle(&self) -> bool {
        self.lock_current().is_none()
    }

    /// Warn if the current trigger has run for at least the warning time.
    /// Returns the elapsed time when flagged. The trigger is never interrupted.
    pub fn check_health(&self) -> Option<Duration> {
        self.check_health_at(Instant::now())
    }

    pub fn check_health_at(&self, now: Instant) -> Option<Duration> {
        let (label, elapsed) = {
            let current = self.lock_current();
            let flight = current.as_ref()?;
            (flight.label.clone(), now.saturating_duration_since(flight.started))
        };
        if elapsed < self.warning_time {
            return None;
        }
        warn!(
            worker = %self.name,
            trigger = %label,
            seconds = elapsed.as_secs_f64(),
            "Trigger {} has been running for {} seconds",
            label,
            elapsed.as_secs_f64()
        );
        Some(elapsed)
    }

    fn set_current(&self, value: Option<InFlight>) {
        *self.lock_current() = value;
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
