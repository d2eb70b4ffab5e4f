use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sharedthread_core::{Result, SchedulerError, SchedulerKind, Trigger};
use tracing::{debug, info, warn};

use crate::context::Monitoring;
use crate::semaphore::Semaphore;
use crate::worker::Worker;

use super::{ClientSet, Scheduler};

/// How long `suspend` waits for the dispatcher thread to finish.
pub const SUSPEND_JOIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Shared {
    clients: ClientSet,
    /// Activations collected since the last drain.
    runnables: Mutex<Vec<Arc<dyn Trigger>>>,
    wakeup: Semaphore,
    /// Whether a dispatcher is currently attached.
    running: AtomicBool,
}

impl Shared {
    fn lock_runnables(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Trigger>>> {
        self.runnables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatcher body. Each wakeup swaps out the whole pending list and runs
    /// it in order; activations arriving meanwhile wait for the next cycle.
    ///
    /// `stop` belongs to this dispatcher alone, so a dispatcher detached by a
    /// timed-out suspend still exits after a later resume.
    fn drain(&self, worker: &Worker, stop: &AtomicBool) {
        let mut working: Vec<Arc<dyn Trigger>> = Vec::new();
        while !stop.load(Ordering::Acquire) {
            self.wakeup.wait_for_set();
            std::mem::swap(&mut *self.lock_runnables(), &mut working);

            let mut batch = working.drain(..);
            while let Some(trigger) = batch.next() {
                if stop.load(Ordering::Acquire) {
                    self.requeue_front(std::iter::once(trigger).chain(batch).collect());
                    break;
                }
                if self.clients.contains(&trigger) {
                    worker.run_trigger(&trigger);
                }
            }
        }
    }

    /// Put an unfinished batch back ahead of anything queued since.
    fn requeue_front(&self, mut rest: Vec<Arc<dyn Trigger>>) {
        {
            let mut pending = self.lock_runnables();
            rest.append(&mut pending);
            *pending = rest;
        }
        self.wakeup.set();
    }
}

struct Dispatcher {
    handle: JoinHandle<()>,
    finished: mpsc::Receiver<()>,
    stop: Arc<AtomicBool>,
}

/// On-demand scheduler: a single thread runs activations in batches.
///
/// Within a batch, triggers run one after another in activation order.
pub struct SimpleScheduler {
    id: String,
    monitoring: Arc<Monitoring>,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<Dispatcher>>,
    join_timeout: Duration,
}

impl SimpleScheduler {
    pub fn new(id: impl Into<String>, monitoring: Arc<Monitoring>) -> Self {
        Self {
            id: id.into(),
            monitoring,
            shared: Arc::new(Shared::default()),
            dispatcher: Mutex::new(None),
            join_timeout: SUSPEND_JOIN_TIMEOUT,
        }
    }

    /// Override how long `suspend` waits before detaching the dispatcher.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Activations waiting for the next drain cycle.
    pub fn pending_len(&self) -> usize {
        self.shared.lock_runnables().len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn lock_dispatcher(&self) -> std::sync::MutexGuard<'_, Option<Dispatcher>> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for SimpleScheduler {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Simple
    }

    fn assure_started(&self) -> Result<()> {
        let mut dispatcher = self.lock_dispatcher();
        if dispatcher.is_some() {
            return Ok(());
        }

        let name = format!("SimpleScheduler/{}", self.id);
        let worker = self.monitoring.new_worker(name.clone())?;
        let shared = Arc::clone(&self.shared);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (finished_tx, finished) = mpsc::channel();
        self.shared.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            shared.drain(&worker, &thread_stop);
            finished_tx.send(()).ok();
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(SchedulerError::ThreadSpawn { name, source });
            }
        };
        *dispatcher = Some(Dispatcher {
            handle,
            finished,
            stop,
        });

        // Pick up anything queued while suspended.
        if self.pending_len() > 0 {
            self.shared.wakeup.set();
        }
        info!(scheduler = %self.id, "dispatcher started");
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
        self.shared.lock_runnables().push(Arc::clone(client));
        self.shared.wakeup.set();
        Ok(())
    }

    fn is_registered(&self, client: &Arc<dyn Trigger>) -> bool {
        self.shared.clients.contains(client)
    }

    fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    fn suspend(&self) {
        let Some(dispatcher) = self.lock_dispatcher().take() else {
            return;
        };
        dispatcher.stop.store(true, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.wakeup.set();

        match dispatcher.finished.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                dispatcher.handle.join().ok();
                info!(scheduler = %self.id, "dispatcher suspended");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    scheduler = %self.id,
                    timeout = ?self.join_timeout,
                    "dispatcher still busy after suspend timeout, detaching"
                );
            }
        }
    }

    fn resume(&self) -> Result<()> {
        if !self.is_running() {
            self.assure_started()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use sharedthread_core::{NamedTrigger, SchedulerPolicy};

    use super::*;
    use crate::scheduler::{register, unregister};

    fn simple(id: &str) -> Arc<SimpleScheduler> {
        let policy = SchedulerPolicy {
            watching: false,
            ..SchedulerPolicy::default()
        };
        Arc::new(SimpleScheduler::new(id, Monitoring::from_policy(&policy)))
    }

    fn signalling(name: &str, tx: mpsc::Sender<String>) -> Arc<dyn Trigger> {
        let tx = Mutex::new(tx);
        let label = name.to_string();
        NamedTrigger::shared(name, move || {
            tx.lock().unwrap().send(label.clone()).ok();
            Ok(())
        })
    }

    #[test]
    fn runs_on_named_dispatcher_thread() {
        let scheduler: Arc<dyn Scheduler> = simple("agent-b");
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let trigger = NamedTrigger::shared("t", move || {
            tx.lock().unwrap().send(thread::current().name().map(str::to_string)).ok();
            Ok(())
        });
        register(&scheduler, trigger, "r").unwrap().activate().unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("SimpleScheduler/agent-b"));
    }

    #[test]
    fn suspend_stops_dispatch_and_resume_catches_up() {
        let inner = simple("agent-c");
        let scheduler: Arc<dyn Scheduler> = inner.clone();
        let (tx, rx) = mpsc::channel();
        let handle = register(&scheduler, signalling("t", tx), "r").unwrap();

        scheduler.suspend();
        assert!(!inner.is_running());

        handle.activate().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(inner.pending_len(), 1);

        scheduler.resume().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "t");
    }

    fn blocking(name: &str) -> (Arc<dyn Trigger>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (entered_tx, release_rx) = (Mutex::new(entered_tx), Mutex::new(release_rx));
        let trigger = NamedTrigger::shared(name, move || {
            entered_tx.lock().unwrap().send(()).ok();
            release_rx.lock().unwrap().recv().ok();
            Ok(())
        });
        (trigger, entered_rx, release_tx)
    }

    #[test]
    fn detached_dispatcher_exits_after_resume() {
        let policy = SchedulerPolicy {
            watching: false,
            ..SchedulerPolicy::default()
        };
        let inner = Arc::new(
            SimpleScheduler::new("twin", Monitoring::from_policy(&policy))
                .with_join_timeout(Duration::from_millis(50)),
        );
        let scheduler: Arc<dyn Scheduler> = inner.clone();
        let (slow, slow_entered, slow_release) = blocking("slow");
        let (busy, busy_entered, busy_release) = blocking("busy");
        let (tx, rx) = mpsc::channel();

        let slow = register(&scheduler, slow, "r").unwrap();
        let busy = register(&scheduler, busy, "r").unwrap();
        let last = register(&scheduler, signalling("last", tx), "r").unwrap();

        slow.activate().unwrap();
        slow_entered.recv_timeout(Duration::from_secs(5)).unwrap();
        // Times out and detaches the dispatcher stuck in `slow`.
        scheduler.suspend();
        assert!(!inner.is_running());

        scheduler.resume().unwrap();
        busy.activate().unwrap();
        busy_entered.recv_timeout(Duration::from_secs(5)).unwrap();

        slow_release.send(()).unwrap();
        last.activate().unwrap();
        // Only the new dispatcher may run it, and it is still inside `busy`.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(inner.pending_len(), 1);

        busy_release.send(()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "last");
    }

    #[test]
    fn suspend_mid_batch_keeps_the_rest_queued() {
        let inner = simple("agent-f");
        let scheduler: Arc<dyn Scheduler> = inner.clone();
        let (first, entered, release) = blocking("first");
        let (tx, rx) = mpsc::channel();

        let first = register(&scheduler, first, "r").unwrap();
        let second = register(&scheduler, signalling("second", tx), "r").unwrap();
        scheduler.suspend();
        first.activate().unwrap();
        second.activate().unwrap();
        scheduler.resume().unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let suspending = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || scheduler.suspend())
        };
        // Wait for suspend to raise the stop flag before `first` returns.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while inner.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!inner.is_running());
        release.send(()).unwrap();
        suspending.join().unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(inner.pending_len(), 1);
        scheduler.resume().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
    }

    #[test]
    fn suspend_before_start_is_harmless() {
        let inner = simple("idle");
        inner.suspend();
        assert!(!inner.is_running());
    }

    #[test]
    fn unregistered_entries_are_skipped() {
        let inner = simple("agent-d");
        let scheduler: Arc<dyn Scheduler> = inner.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let trigger = {
            let hits = Arc::clone(&hits);
            NamedTrigger::shared("gone", move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let handle = register(&scheduler, Arc::clone(&trigger), "r").unwrap();
        unregister(scheduler.as_ref(), &trigger);
        handle.activate().unwrap();
        assert_eq!(inner.pending_len(), 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn double_registration_keeps_one_entry() {
        let scheduler: Arc<dyn Scheduler> = simple("agent-e");
        let trigger = NamedTrigger::shared("t", || Ok(()));
        register(&scheduler, Arc::clone(&trigger), "r").unwrap();
        register(&scheduler, Arc::clone(&trigger), "other").unwrap();
        assert_eq!(scheduler.client_count(), 1);
    }
}
