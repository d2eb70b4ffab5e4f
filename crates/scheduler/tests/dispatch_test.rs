//! End-to-end dispatch behaviour of the scheduling strategies.
//!
//! Every test uses its own context so statistics and shared schedulers do
//! not leak between tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sharedthread_core::{NamedTrigger, SchedulerError, SchedulerKind, SchedulerPolicy, Trigger};
use sharedthread_scheduler::{
    register, unregister, Scheduler, SchedulerContext, SchedulerServiceProvider,
    SimpleScheduler, TrivialThreadService,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(100);

fn policy() -> SchedulerPolicy {
    SchedulerPolicy {
        watching: false,
        ..SchedulerPolicy::default()
    }
}

fn scheduler(ctx: &SchedulerContext, kind: SchedulerKind, id: &str) -> Arc<dyn Scheduler> {
    ctx.create_scheduler(kind, id, TrivialThreadService::new(), false)
}

/// Trigger that appends its name to a shared log.
fn logging(
    name: &str,
    log: &Arc<Mutex<Vec<String>>>,
    done: &mpsc::Sender<()>,
) -> Arc<dyn Trigger> {
    let log = Arc::clone(log);
    let done = Mutex::new(done.clone());
    let label = name.to_string();
    NamedTrigger::shared(name, move || {
        log.lock().unwrap().push(label.clone());
        done.lock().unwrap().send(()).ok();
        Ok(())
    })
}

/// Trigger that blocks until released, announcing when it starts.
struct Gate {
    trigger: Arc<dyn Trigger>,
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

fn gate(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Gate {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel::<()>();
    let (entered_tx, release_rx) = (Mutex::new(entered_tx), Mutex::new(release_rx));
    let log = Arc::clone(log);
    let label = name.to_string();
    let trigger = NamedTrigger::shared(name, move || {
        entered_tx.lock().unwrap().send(()).ok();
        release_rx.lock().unwrap().recv().ok();
        log.lock().unwrap().push(label.clone());
        Ok(())
    });
    Gate {
        trigger,
        entered,
        release,
    }
}

fn wait_for(done: &mpsc::Receiver<()>, n: usize) {
    for _ in 0..n {
        done.recv_timeout(TIMEOUT).expect("trigger did not run in time");
    }
}

fn queued_runs_follow_submission_order(kind: SchedulerKind) {
    let ctx = SchedulerContext::new(SchedulerPolicy {
        scheduler_threads: 1,
        ..policy()
    });
    let scheduler = scheduler(&ctx, kind, "ordered");
    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done) = mpsc::channel();

    let gate = gate("gate", &log);
    let gate_handle = register(&scheduler, Arc::clone(&gate.trigger), "r").unwrap();
    let handles: Vec<_> = ["t1", "t2", "t3"]
        .iter()
        .map(|name| register(&scheduler, logging(name, &log, &done_tx), "r").unwrap())
        .collect();

    gate_handle.activate().unwrap();
    gate.entered.recv_timeout(TIMEOUT).unwrap();
    for handle in &handles {
        handle.activate().unwrap();
    }
    gate.release.send(()).unwrap();
    wait_for(&done, 3);

    assert_eq!(*log.lock().unwrap(), vec!["gate", "t1", "t2", "t3"]);
}

#[test]
fn multi_runs_in_submission_order() {
    queued_runs_follow_submission_order(SchedulerKind::Multi);
}

#[test]
fn simple_runs_in_submission_order() {
    queued_runs_follow_submission_order(SchedulerKind::Simple);
}

#[test]
fn multi_pool_of_two_runs_each_client_exactly_once() {
    let ctx = SchedulerContext::new(SchedulerPolicy {
        scheduler_threads: 2,
        ..policy()
    });
    let scheduler = scheduler(&ctx, SchedulerKind::Multi, "pool");
    let (done_tx, done) = mpsc::channel();

    let counters: Vec<Arc<AtomicUsize>> = (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let handles: Vec<_> = ["A", "B"]
        .iter()
        .zip(&counters)
        .map(|(name, hits)| {
            let hits = Arc::clone(hits);
            let done = Mutex::new(done_tx.clone());
            let trigger = NamedTrigger::shared(*name, move || {
                hits.fetch_add(1, Ordering::SeqCst);
                done.lock().unwrap().send(()).ok();
                Ok(())
            });
            register(&scheduler, trigger, "r").unwrap()
        })
        .collect();

    let producers: Vec<_> = handles
        .into_iter()
        .map(|handle| thread::spawn(move || handle.activate().unwrap()))
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    wait_for(&done, 2);
    thread::sleep(SETTLE);
    for hits in &counters {
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn simple_defers_arrivals_during_a_drain_to_the_next_cycle() {
    let ctx = SchedulerContext::new(policy());
    let simple = Arc::new(SimpleScheduler::new("batch", Arc::clone(ctx.monitoring())));
    let scheduler: Arc<dyn Scheduler> = simple.clone();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done) = mpsc::channel();

    let first = gate("b1", &log);
    let mut batch = vec![register(&scheduler, Arc::clone(&first.trigger), "r").unwrap()];
    for name in ["b2", "b3"] {
        batch.push(register(&scheduler, logging(name, &log, &done_tx), "r").unwrap());
    }
    let late: Vec<_> = ["n1", "n2", "n3", "n4", "n5"]
        .iter()
        .map(|name| register(&scheduler, logging(name, &log, &done_tx), "r").unwrap())
        .collect();

    // Queue the whole first batch while suspended so one drain takes it all.
    scheduler.suspend();
    for handle in &batch {
        handle.activate().unwrap();
    }
    assert_eq!(simple.pending_len(), 3);
    scheduler.resume().unwrap();
    first.entered.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(simple.pending_len(), 0);

    for handle in &late {
        handle.activate().unwrap();
    }
    // New arrivals sit in the pending list, outside the running batch.
    assert_eq!(simple.pending_len(), 5);

    first.release.send(()).unwrap();
    wait_for(&done, 7);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["b1", "b2", "b3", "n1", "n2", "n3", "n4", "n5"]
    );
    assert_eq!(simple.pending_len(), 0);
}

#[test]
fn register_then_unregister_leaves_nothing_runnable() {
    for kind in [SchedulerKind::Multi, SchedulerKind::Simple, SchedulerKind::Normal] {
        let ctx = SchedulerContext::new(policy());
        let scheduler = scheduler(&ctx, kind, "churn");
        let hits = Arc::new(AtomicUsize::new(0));
        let trigger = {
            let hits = Arc::clone(&hits);
            NamedTrigger::shared("churn", move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        register(&scheduler, Arc::clone(&trigger), "r").unwrap();
        unregister(scheduler.as_ref(), &trigger);
        assert_eq!(scheduler.client_count(), 0);

        let result = scheduler.schedule_client(&trigger);
        match kind {
            SchedulerKind::Normal => {
                assert!(matches!(result, Err(SchedulerError::UnregisteredClient(_))))
            }
            _ => assert!(result.is_ok(), "{kind} should ignore the activation"),
        }
        thread::sleep(SETTLE);
        assert_eq!(hits.load(Ordering::SeqCst), 0, "{kind} ran an unregistered client");
    }
}

#[test]
fn double_registration_is_idempotent_for_every_kind() {
    for kind in [SchedulerKind::Multi, SchedulerKind::Simple, SchedulerKind::Normal] {
        let ctx = SchedulerContext::new(policy());
        let scheduler = scheduler(&ctx, kind, "twice");
        let trigger = NamedTrigger::shared("twice", || Ok(()));
        register(&scheduler, Arc::clone(&trigger), "r").unwrap();
        register(&scheduler, Arc::clone(&trigger), "r").unwrap();
        assert_eq!(scheduler.client_count(), 1, "{kind}");
        assert!(scheduler.is_registered(&trigger));
    }
}

#[test]
fn failing_clients_do_not_stop_dispatch() {
    for kind in [SchedulerKind::Multi, SchedulerKind::Simple, SchedulerKind::Normal] {
        let ctx = SchedulerContext::new(SchedulerPolicy {
            scheduler_threads: 1,
            keeping_statistics: true,
            ..policy()
        });
        let scheduler = scheduler(&ctx, kind, "faulty");
        let log = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = mpsc::channel();

        let erroring = NamedTrigger::shared("err", || anyhow::bail!("client error"));
        let panicking = NamedTrigger::shared("panic", || panic!("client bug"));
        let healthy = logging("ok", &log, &done_tx);

        let e = register(&scheduler, Arc::clone(&erroring), "r").unwrap();
        let p = register(&scheduler, Arc::clone(&panicking), "r").unwrap();
        let h = register(&scheduler, healthy, "r").unwrap();
        e.activate().unwrap();
        p.activate().unwrap();
        h.activate().unwrap();
        wait_for(&done, 1);

        // Faults are still timed and counted once they complete.
        let stats = ctx.statistics().unwrap();
        let deadline = Instant::now() + TIMEOUT;
        while stats.len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stats.get(&erroring).map(|s| s.count), Some(1), "{kind}");
        assert_eq!(stats.get(&panicking).map(|s| s.count), Some(1), "{kind}");
    }
}

#[test]
fn statistics_count_every_invocation_through_the_provider() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = SchedulerContext::new(SchedulerPolicy {
        keeping_statistics: true,
        static_scheduler: true,
        scheduler_threads: 2,
        node_name: "stats-node".into(),
        statistics_dir: dir.path().to_path_buf(),
        ..policy()
    });
    let provider = SchedulerServiceProvider::new(&ctx, TrivialThreadService::new(), "agent-a");
    let service = provider.get_service("agent-a/plugin");

    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done) = mpsc::channel();
    let trigger = logging("plugin", &log, &done_tx);
    let handle = service.register(Arc::clone(&trigger)).unwrap();

    const RUNS: u64 = 4;
    for _ in 0..RUNS {
        handle.activate().unwrap();
        wait_for(&done, 1);
    }

    let stats = ctx.statistics().unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while stats.get(&trigger).map_or(0, |s| s.count) < RUNS && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let entry = stats.get(&trigger).unwrap();
    assert_eq!(entry.count, RUNS);
    assert_eq!(entry.label, "plugin");

    let path = ctx.policy().statistics_path();
    stats.dump_to(&path).unwrap();
    let report = std::fs::read_to_string(&path).unwrap();
    assert!(report.starts_with("plugin\t4\t"), "unexpected report: {report}");

    service.unregister(&trigger);
    provider.release_service(service);
}

#[test]
fn handles_compose_as_triggers() {
    let ctx = SchedulerContext::new(policy());
    let outer = scheduler(&ctx, SchedulerKind::Simple, "outer");
    let inner = scheduler(&ctx, SchedulerKind::Multi, "inner");
    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done) = mpsc::channel();

    let leaf = register(&inner, logging("leaf", &log, &done_tx), "r").unwrap();
    let relay: Arc<dyn Trigger> = Arc::new(leaf);
    let relay_handle = register(&outer, relay, "r").unwrap();

    relay_handle.activate().unwrap();
    wait_for(&done, 1);
    assert_eq!(*log.lock().unwrap(), vec!["leaf"]);
}
