mod cli;
mod workload;

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use sharedthread_core::SchedulerPolicy;
use sharedthread_scheduler::{SchedulerContext, SchedulerServiceProvider, TrivialThreadService};

use crate::cli::CliArgs;
use crate::workload::Workload;

const SETTLE_DEADLINE: Duration = Duration::from_secs(120);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    sharedthread_core::load_dotenv();
    let args = CliArgs::parse();

    let mut policy = SchedulerPolicy::from_env();
    args.apply(&mut policy);

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&policy.summary())?);
        return Ok(());
    }
    policy.log_summary();

    let ctx = SchedulerContext::new(policy);
    let provider =
        SchedulerServiceProvider::new(&ctx, TrivialThreadService::new(), "sharedthread-cli");
    let service = provider.get_service("sharedthread-cli/workload");

    let workload = Workload::new(args.clients, Duration::from_millis(args.work_ms));
    let handles = workload
        .register(&service)
        .context("failed to register workload clients")?;

    let started = Instant::now();
    let fired = Workload::fire(&handles, args.rounds).context("activation failed")?;
    let runs = workload.settle(SETTLE_DEADLINE);
    info!(
        fired,
        runs,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "workload finished"
    );

    if let Some(statistics) = ctx.statistics() {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        statistics
            .report_statistics(&mut out)
            .context("failed to write statistics report")?;
        out.flush()?;

        if args.dump {
            let path = ctx.policy().statistics_path();
            statistics
                .dump_to(&path)
                .with_context(|| format!("failed to dump statistics to {}", path.display()))?;
            info!(path = %path.display(), "statistics dumped");
        }
    }

    for trigger in workload.triggers() {
        service.unregister(trigger);
    }
    provider.release_service(service);
    provider.suspend();
    Ok(())
}
