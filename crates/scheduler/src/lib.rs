//! Shared-thread trigger scheduling.
//!
//! Many independent clients register a [`Trigger`](sharedthread_core::Trigger)
//! and activate it whenever they have work; a scheduler runs the trigger on
//! one of its own threads. Workers isolate client faults, optionally keep
//! invocation statistics, and are scanned by a watcher thread for triggers
//! that run too long.

pub mod context;
pub mod provider;
pub mod proxy;
mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod statistics;
pub mod thread_service;
pub mod watcher;
pub mod worker;

pub use context::{Monitoring, SchedulerContext};
pub use provider::SchedulerServiceProvider;
pub use proxy::SchedulerProxy;
pub use scheduler::{
    ClientHandle, MultiScheduler, NormalScheduler, Scheduler, SimpleScheduler, register,
    unregister,
};
pub use semaphore::Semaphore;
pub use statistics::{InvocationStatistics, StatisticsRegistry};
pub use thread_service::{Schedulable, ThreadService, TrivialThreadService};
pub use watcher::Watcher;
pub use worker::Worker;
