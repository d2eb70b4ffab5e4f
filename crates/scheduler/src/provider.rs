//! Service-provider boundary used by the owning component framework.

use std::sync::Arc;

use sharedthread_core::Result;
use tracing::info;

use crate::context::SchedulerContext;
use crate::proxy::SchedulerProxy;
use crate::scheduler::Scheduler;
use crate::thread_service::ThreadService;

/// Hands out [`SchedulerProxy`] services backed by one scheduler.
pub struct SchedulerServiceProvider {
    scheduler: Arc<dyn Scheduler>,
}

impl SchedulerServiceProvider {
    /// Build a provider following the context policy: the shared pooled
    /// scheduler when `static_scheduler` is set, otherwise a private
    /// scheduler of the configured kind named `name`.
    pub fn new(
        ctx: &SchedulerContext,
        thread_service: Arc<dyn ThreadService>,
        name: &str,
    ) -> Self {
        let shared = ctx.policy().static_scheduler;
        Self::with_sharing(ctx, thread_service, name, shared)
    }

    pub fn with_sharing(
        ctx: &SchedulerContext,
        thread_service: Arc<dyn ThreadService>,
        name: &str,
        shared: bool,
    ) -> Self {
        let scheduler = ctx.create_scheduler(ctx.policy().kind, name, thread_service, shared);
        info!(
            provider = %name,
            scheduler = %scheduler.id(),
            kind = %scheduler.kind(),
            shared,
            "scheduler service provider created"
        );
        Self { scheduler }
    }

    pub fn get_service(&self, requestor: &str) -> SchedulerProxy {
        SchedulerProxy::new(Arc::clone(&self.scheduler), requestor)
    }

    pub fn release_service(&self, _service: SchedulerProxy) {}

    pub fn suspend(&self) {
        self.scheduler.suspend();
    }

    pub fn resume(&self) -> Result<()> {
        self.scheduler.resume()
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }
}
