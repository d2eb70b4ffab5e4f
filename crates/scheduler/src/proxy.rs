use std::fmt;
use std::sync::Arc;

use sharedthread_core::{Result, Trigger};

use crate::scheduler::{self, ClientHandle, Scheduler};

/// Per-requestor view of a scheduler. Hides which strategy is behind it.
#[derive(Clone)]
pub struct SchedulerProxy {
    scheduler: Arc<dyn Scheduler>,
    requestor: String,
}

impl SchedulerProxy {
    pub fn new(scheduler: Arc<dyn Scheduler>, requestor: impl Into<String>) -> Self {
        Self {
            scheduler,
            requestor: requestor.into(),
        }
    }

    /// Register `trigger`; activate the returned handle whenever it should run.
    pub fn register(&self, trigger: Arc<dyn Trigger>) -> Result<ClientHandle> {
        scheduler::register(&self.scheduler, trigger, &self.requestor)
    }

    pub fn unregister(&self, trigger: &Arc<dyn Trigger>) {
        scheduler::unregister(self.scheduler.as_ref(), trigger);
    }

    pub fn requestor(&self) -> &str {
        &self.requestor
    }
}

impl fmt::Debug for SchedulerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerProxy")
            .field("scheduler", &self.scheduler.id())
            .field("requestor", &self.requestor)
            .finish()
    }
}
