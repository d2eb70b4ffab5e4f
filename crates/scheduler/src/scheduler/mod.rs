//! Shared-thread scheduling strategies.
//!
//! Clients register a [`Trigger`] and get back a [`ClientHandle`]; activating
//! the handle asks the scheduler to run the trigger on one of its threads.
//! Three strategies implement [`Scheduler`]:
//! - [`NormalScheduler`]: one unit per client from a [`ThreadService`](crate::ThreadService)
//! - [`MultiScheduler`]: fixed worker pool draining a shared FIFO
//! - [`SimpleScheduler`]: one dispatcher draining batches

mod multi;
mod normal;
mod simple;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use sharedthread_core::{Result, SchedulerKind, Trigger, TriggerKey};

pub use multi::MultiScheduler;
pub use normal::NormalScheduler;
pub use simple::{SUSPEND_JOIN_TIMEOUT, SimpleScheduler};

/// Contract shared by every scheduling strategy.
pub trait Scheduler: Send + Sync {
    /// Identifier used in thread names and logs.
    fn id(&self) -> &str;

    fn kind(&self) -> SchedulerKind;

    /// Start background threads if they are not running yet.
    fn assure_started(&self) -> Result<()>;

    /// Add a client. Registering an already-known trigger keeps the existing entry.
    fn add_client(&self, client: Arc<dyn Trigger>, requestor: &str) -> Result<()>;

    /// Stop dispatching `client`. Runs already in progress finish normally.
    /// Unknown clients are ignored.
    fn remove_client(&self, client: &Arc<dyn Trigger>);

    /// Ask for `client` to run as soon as possible. Safe to call from any thread.
    fn schedule_client(&self, client: &Arc<dyn Trigger>) -> Result<()>;

    fn is_registered(&self, client: &Arc<dyn Trigger>) -> bool;

    fn client_count(&self) -> usize;

    /// Best-effort pause of background dispatch.
    fn suspend(&self) {}

    fn resume(&self) -> Result<()> {
        Ok(())
    }
}

/// Register `trigger` with `scheduler`, starting it lazily.
pub fn register(
    scheduler: &Arc<dyn Scheduler>,
    trigger: Arc<dyn Trigger>,
    requestor: &str,
) -> Result<ClientHandle> {
    scheduler.assure_started()?;
    scheduler.add_client(Arc::clone(&trigger), requestor)?;
    Ok(ClientHandle {
        scheduler: Arc::clone(scheduler),
        client: trigger,
    })
}

pub fn unregister(scheduler: &dyn Scheduler, trigger: &Arc<dyn Trigger>) {
    scheduler.remove_client(trigger);
}

/// Callback returned by registration. Activating it schedules the client.
///
/// The handle is itself a [`Trigger`], so it can be passed to code that
/// only knows how to poke triggers.
#[derive(Clone)]
pub struct ClientHandle {
    scheduler: Arc<dyn Scheduler>,
    client: Arc<dyn Trigger>,
}

impl ClientHandle {
    /// Request that the client run.
    pub fn activate(&self) -> Result<()> {
        self.scheduler.schedule_client(&self.client)
    }

    pub fn client(&self) -> &Arc<dyn Trigger> {
        &self.client
    }
}

impl Trigger for ClientHandle {
    fn trigger(&self) -> anyhow::Result<()> {
        self.activate()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.scheduler.id(), self.client.describe())
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("scheduler", &self.scheduler.id())
            .field("client", &self.client.describe())
            .finish()
    }
}

/// Registered clients of the queue-based schedulers.
#[derive(Default)]
pub(crate) struct ClientSet {
    clients: Mutex<HashMap<TriggerKey, Arc<dyn Trigger>>>,
}

impl ClientSet {
    /// Returns `false` if the client was already present.
    pub(crate) fn insert(&self, client: Arc<dyn Trigger>) -> bool {
        let mut clients = self.lock();
        let key = TriggerKey::of(&client);
        if clients.contains_key(&key) {
            return false;
        }
        clients.insert(key, client);
        true
    }

    pub(crate) fn remove(&self, client: &Arc<dyn Trigger>) -> bool {
        self.lock().remove(&TriggerKey::of(client)).is_some()
    }

    pub(crate) fn contains(&self, client: &Arc<dyn Trigger>) -> bool {
        self.lock().contains_key(&TriggerKey::of(client))
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TriggerKey, Arc<dyn Trigger>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
