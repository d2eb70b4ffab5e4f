use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sharedthread_core::{Result, SchedulerError, SchedulerKind, Trigger, TriggerKey};
use tracing::debug;

use crate::context::Monitoring;
use crate::thread_service::{Schedulable, ThreadService};

use super::Scheduler;

/// Gives each client its own schedulable unit from a [`ThreadService`].
///
/// Activations of one client serialize on its unit; different clients run
/// in parallel. Scheduling a client that was never registered is an error.
pub struct NormalScheduler {
    id: String,
    thread_service: Arc<dyn ThreadService>,
    monitoring: Arc<Monitoring>,
    clients: Mutex<HashMap<TriggerKey, Arc<dyn Schedulable>>>,
}

impl NormalScheduler {
    pub fn new(
        id: impl Into<String>,
        thread_service: Arc<dyn ThreadService>,
        monitoring: Arc<Monitoring>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_service,
            monitoring,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, HashMap<TriggerKey, Arc<dyn Schedulable>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for NormalScheduler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Normal
    }

    fn assure_started(&self) -> Result<()> {
        Ok(())
    }

    fn add_client(&self, client: Arc<dyn Trigger>, requestor: &str) -> Result<()> {
        let mut clients = self.lock_clients();
        let key = TriggerKey::of(&client);
        if clients.contains_key(&key) {
            return Ok(());
        }

        let worker = self.monitoring.new_worker(requestor)?;
        let runnable = Arc::new(move || {
            worker.run_trigger(&client);
        });
        let schedulable = self
            .thread_service
            .get_thread(requestor, runnable, Some(requestor));
        debug!(
            scheduler = %self.id,
            client = %key,
            thread = %schedulable.name(),
            "client registered"
        );
        clients.insert(key, schedulable);
        Ok(())
    }

    fn remove_client(&self, client: &Arc<dyn Trigger>) {
        if let Some(schedulable) = self.lock_clients().remove(&TriggerKey::of(client)) {
            // Drops any rerun queued behind a run in progress.
            schedulable.cancel();
        }
    }

    fn schedule_client(&self, client: &Arc<dyn Trigger>) -> Result<()> {
        let schedulable = self
            .lock_clients()
            .get(&TriggerKey::of(client))
            .cloned()
            .ok_or_else(|| SchedulerError::UnregisteredClient(client.describe()))?;
        schedulable.start()
    }

    fn is_registered(&self, client: &Arc<dyn Trigger>) -> bool {
        self.lock_clients().contains_key(&TriggerKey::of(client))
    }

    fn client_count(&self) -> usize {
        self.lock_clients().len()
    }
}
