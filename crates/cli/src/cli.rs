use clap::Parser;
use sharedthread_core::{SchedulerKind, SchedulerPolicy};

/// Drive a synthetic workload through the shared-thread scheduler.
///
/// Policy comes from the environment (and `.env`); flags given here take
/// precedence over it.
#[derive(Parser, Debug)]
#[command(name = "sharedthread", about = "Exercise the shared-thread trigger scheduler")]
pub struct CliArgs {
    /// Number of registered clients
    #[arg(long, env = "SHAREDTHREAD_CLIENTS", default_value = "4")]
    pub clients: usize,

    /// Activations per client
    #[arg(long, env = "SHAREDTHREAD_ROUNDS", default_value = "10")]
    pub rounds: usize,

    /// Simulated work per activation, in milliseconds
    #[arg(long, env = "SHAREDTHREAD_WORK_MS", default_value = "5")]
    pub work_ms: u64,

    /// Scheduler kind: normal, multi or simple
    #[arg(long)]
    pub kind: Option<SchedulerKind>,

    /// Pool size for the multi scheduler
    #[arg(long)]
    pub threads: Option<usize>,

    /// Use the node-wide shared scheduler
    #[arg(long = "static")]
    pub static_scheduler: bool,

    /// Print the effective policy as JSON and exit
    #[arg(long)]
    pub print_config: bool,

    /// Write the statistics report to the statistics directory on exit
    #[arg(long)]
    pub dump: bool,
}

impl CliArgs {
    /// Overlay command-line flags onto a policy loaded from the environment.
    pub fn apply(&self, policy: &mut SchedulerPolicy) {
        if let Some(kind) = self.kind {
            policy.kind = kind;
        }
        if let Some(threads) = self.threads.filter(|&n| n > 0) {
            policy.scheduler_threads = threads;
        }
        if self.static_scheduler {
            policy.static_scheduler = true;
        }
        if self.dump {
            policy.keeping_statistics = true;
        }
    }
}
