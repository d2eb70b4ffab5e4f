//! Named-thread facility used by the per-client scheduler.
//!
//! [`ThreadService`] hands out [`Schedulable`] units bound to a runnable.
//! The bundled [`TrivialThreadService`] runs each unit on its own OS thread
//! with no queueing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use sharedthread_core::{Result, SchedulerError};
use tracing::debug;

/// Body of a schedulable unit.
pub type Runnable = Arc<dyn Fn() + Send + Sync>;

/// A named unit of work that can be (re)started on demand.
pub trait Schedulable: Send + Sync {
    /// Request a run. A request made while the unit is already running
    /// causes exactly one more run after the current one finishes.
    fn start(&self) -> Result<()>;

    /// Prevent any further runs. A run in progress completes.
    fn cancel(&self);

    fn name(&self) -> &str;

    /// Name of the component the unit works for.
    fn consumer(&self) -> &str;
}

/// Creates schedulable units.
pub trait ThreadService: Send + Sync {
    /// Bind `runnable` to a new unit. `name` of `None` gets a generated name.
    fn get_thread(
        &self,
        consumer: &str,
        runnable: Runnable,
        name: Option<&str>,
    ) -> Arc<dyn Schedulable>;
}

/// Thread service with no pooling: each running unit owns a thread.
#[derive(Debug, Default)]
pub struct TrivialThreadService {
    anonymous: AtomicU64,
}

impl TrivialThreadService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn generate_name(&self) -> String {
        format!("TrivialThread-{}", self.anonymous.fetch_add(1, Ordering::Relaxed))
    }
}

impl ThreadService for TrivialThreadService {
    fn get_thread(
        &self,
        consumer: &str,
        runnable: Runnable,
        name: Option<&str>,
    ) -> Arc<dyn Schedulable> {
        let name = name.map_or_else(|| self.generate_name(), str::to_string);
        Arc::new(TrivialSchedulable {
            inner: Arc::new(SchedulableInner {
                name,
                consumer: consumer.to_string(),
                runnable,
                state: Mutex::new(RunState::default()),
            }),
        })
    }
}

#[derive(Debug, Default)]
struct RunState {
    /// Outstanding start requests, including the run in progress.
    start_count: u32,
    cancelled: bool,
}

struct SchedulableInner {
    name: String,
    consumer: String,
    runnable: Runnable,
    state: Mutex<RunState>,
}

impl SchedulableInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Thread body: run, then run once more if restarted meanwhile.
    fn run_loop(&self) {
        loop {
            (self.runnable)();
            let mut state = self.lock_state();
            if state.start_count > 1 && !state.cancelled {
                // Any number of intervening starts collapse into one rerun.
                state.start_count = 1;
                debug!(thread = %self.name, "rerunning after start during run");
                continue;
            }
            state.start_count = 0;
            return;
        }
    }
}

/// Unit handed out by [`TrivialThreadService`].
pub struct TrivialSchedulable {
    inner: Arc<SchedulableInner>,
}

impl Schedulable for TrivialSchedulable {
    fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.lock_state();
            if state.cancelled {
                return Ok(());
            }
            state.start_count += 1;
            if state.start_count > 1 {
                return Ok(());
            }
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || inner.run_loop());
        if let Err(source) = spawned {
            self.inner.lock_state().start_count = 0;
            return Err(SchedulerError::ThreadSpawn {
                name: self.inner.name.clone(),
                source,
            });
        }
        Ok(())
    }

    fn cancel(&self) {
        self.inner.lock_state().cancelled = true;
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn consumer(&self) -> &str {
        &self.inner.consumer
    }
}

impl std::fmt::Debug for TrivialSchedulable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Schedulable {}>", self.inner.name)
    }
}
