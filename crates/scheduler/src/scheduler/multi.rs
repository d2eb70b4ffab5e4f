use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use sharedthread_core::{Result, SchedulerError, SchedulerKind, Trigger};
use tracing::{debug, info, warn};

use crate::context::Monitoring;
use crate::queue::PendingQueue;
use crate::worker::Worker;

use super::{ClientSet, Scheduler};

/// State shared between the scheduler handle and its pool threads.
#[derive(Default)]
struct Shared {
    clients: ClientSet,
    pending: PendingQueue<Arc<dyn Trigger>>,
}

/// A fixed pool of workers draining one FIFO of pending clients.
///
/// Producers are client threads activating their handles; consumers are the
/// pool threads. A client activated twice before a worker picks it up runs
/// twice. The pool starts on first registration and is never torn down:
/// [`suspend`](Scheduler::suspend) only logs a warning, because stopping the
/// pool races with in-flight activations.
pub struct MultiScheduler {
    id: String,
    threads: usize,
    monitoring: Arc<Monitoring>,
    shared: Arc<Shared>,
    pool: Mutex<Vec<JoinHandle<()>>>,
}

impl MultiScheduler {
    pub fn new(id: impl Into<String>, threads: usize, monitoring: Arc<Monitoring>) -> Self {
        Self {
            id: id.into(),
            threads: threads.max(1),
            monitoring,
            shared: Arc::new(Shared::default()),
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Number of pool threads started so far.
    pub fn pool_size(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Activations waiting for a worker.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    fn thread_name(&self, index: usize) -> String {
        format!("MultiScheduler/{}({})", self.id, index)
    }

    fn work(shared: Arc<Shared>, worker: Arc<Worker>) {
        while let Some(trigger) = shared.pending.next() {
            if !shared.clients.contains(&trigger) {
                debug!(
                    worker = %worker.name(),
                    trigger = %trigger.describe(),
                    "skipping unregistered client"
                );
                continue;
            }
            worker.run_trigger(&trigger);
        }
        debug!(worker = %worker.name(), "pool worker exiting");
    }
}

impl Scheduler for MultiScheduler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Multi
    }

    fn assure_started(&self) -> Result<()> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if !pool.is_empty() {
            return Ok(());
        }

        self.shared.pending.start();
        for index in 0..self.threads {
            let name = self.thread_name(index);
            let worker = self.monitoring.new_worker(name.clone())?;
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || Self::work(shared, worker))
                .map_err(|source| SchedulerError::ThreadSpawn { name, source })?;
            pool.push(handle);
        }
        info!(scheduler = %self.id, threads = self.threads, "scheduler pool started");
        Ok(())
    }

    fn add_client(&self, client: Arc<dyn Trigger>, _requestor: &str) -> Result<()> {
        self.shared.clients.insert(client);
        Ok(())
    }

    fn remove_client(&self, client: &Arc<dyn Trigger>) {
        self.shared.clients.remove(client);
    }

    fn schedule_client(&self, client: &Arc<dyn Trigger>) -> Result<()> {
        if !self.shared.clients.contains(client) {
            debug!(
                scheduler = %self.id,
                trigger = %client.describe(),
                "ignoring activation of unregistered client"
            );
            return Ok(());
        }
        self.shared.pending.push(Arc::clone(client));
        Ok(())
    }

    fn is_registered(&self, client: &Arc<dyn Trigger>) -> bool {
        self.shared.clients.contains(client)
    }

    fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    fn suspend(&self) {
        if self.shared.pending.is_running() {
            warn!(scheduler = %self.id, "scheduler suspend disabled, okay to proceed");
        }
    }

    fn resume(&self) -> Result<()> {
        if !self.shared.pending.is_running() {
            self.assure_started()?;
        }
        Ok(())
    }
}
