//! Process-wide scheduling state, constructed explicitly and shared by `Arc`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sharedthread_core::{Result, SchedulerKind, SchedulerPolicy};
use tracing::info;

use crate::scheduler::{MultiScheduler, NormalScheduler, Scheduler, SimpleScheduler};
use crate::statistics::StatisticsRegistry;
use crate::thread_service::ThreadService;
use crate::watcher::{Watcher, WatcherSettings};
use crate::worker::Worker;

/// Statistics and watchdog support handed to every scheduler.
///
/// The watcher thread is started on the first worker created.
#[derive(Debug)]
pub struct Monitoring {
    statistics: Option<Arc<StatisticsRegistry>>,
    warning_time: Duration,
    settings: WatcherSettings,
    watcher: Mutex<Option<Arc<Watcher>>>,
}

impl Monitoring {
    pub fn from_policy(policy: &SchedulerPolicy) -> Arc<Self> {
        Arc::new(Self {
            statistics: policy.keeping_statistics.then(StatisticsRegistry::new),
            warning_time: policy.warning_time,
            settings: WatcherSettings {
                watching: policy.watching,
                dumping: policy.dumping_statistics && policy.keeping_statistics,
                report_path: policy.statistics_path(),
            },
            watcher: Mutex::new(None),
        })
    }

    /// Statistics registry, if statistics are being kept.
    pub fn statistics(&self) -> Option<&Arc<StatisticsRegistry>> {
        self.statistics.as_ref()
    }

    /// The watcher, started on first call. `None` when neither watching nor
    /// dumping is enabled.
    pub fn watcher(&self) -> Result<Option<Arc<Watcher>>> {
        if !self.settings.watching && !self.settings.dumping {
            return Ok(None);
        }
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = slot.as_ref() {
            return Ok(Some(Arc::clone(watcher)));
        }
        let watcher = Watcher::spawn(self.settings.clone(), self.statistics.clone())?;
        *slot = Some(Arc::clone(&watcher));
        Ok(Some(watcher))
    }

    /// Create a worker wired to statistics and, when watching, the watcher.
    pub fn new_worker(&self, name: impl Into<String>) -> Result<Arc<Worker>> {
        let worker = Arc::new(Worker::new(name, self.statistics.clone(), self.warning_time));
        if let Some(watcher) = self.watcher()? {
            if self.settings.watching {
                watcher.register(&worker);
            }
        }
        Ok(worker)
    }
}

/// Owns the policy, monitoring and the shared scheduler slot.
pub struct SchedulerContext {
    policy: SchedulerPolicy,
    monitoring: Arc<Monitoring>,
    shared: Mutex<Option<Arc<dyn Scheduler>>>,
}

impl SchedulerContext {
    pub fn new(policy: SchedulerPolicy) -> Arc<Self> {
        let monitoring = Monitoring::from_policy(&policy);
        Arc::new(Self {
            policy,
            monitoring,
            shared: Mutex::new(None),
        })
    }

    /// Load `.env`, then build the policy from the environment.
    pub fn from_env() -> Arc<Self> {
        sharedthread_core::load_dotenv();
        Self::new(SchedulerPolicy::from_env())
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    pub fn monitoring(&self) -> &Arc<Monitoring> {
        &self.monitoring
    }

    pub fn statistics(&self) -> Option<&Arc<StatisticsRegistry>> {
        self.monitoring.statistics()
    }

    /// Build a scheduler of the given kind. `shared` returns the context's
    /// single pooled scheduler instead, creating it on first use.
    pub fn create_scheduler(
        &self,
        kind: SchedulerKind,
        id: &str,
        thread_service: Arc<dyn ThreadService>,
        shared: bool,
    ) -> Arc<dyn Scheduler> {
        if shared {
            return self.shared_scheduler();
        }
        let monitoring = Arc::clone(&self.monitoring);
        match kind {
            SchedulerKind::Normal => Arc::new(NormalScheduler::new(id, thread_service, monitoring)),
            SchedulerKind::Multi => Arc::new(MultiScheduler::new(
                id,
                self.policy.scheduler_threads,
                monitoring,
            )),
            SchedulerKind::Simple => Arc::new(SimpleScheduler::new(id, monitoring)),
        }
    }

    /// The one pooled scheduler for this context, named after the node.
    pub fn shared_scheduler(&self) -> Arc<dyn Scheduler> {
        let mut slot = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let scheduler = slot.get_or_insert_with(|| {
            info!(
                node = %self.policy.node_name,
                threads = self.policy.scheduler_threads,
                "creating shared scheduler"
            );
            Arc::new(MultiScheduler::new(
                &self.policy.node_name,
                self.policy.scheduler_threads,
                Arc::clone(&self.monitoring),
            ))
        });
        Arc::clone(scheduler)
    }
}
