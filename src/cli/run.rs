//! The `run` command

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cycle_bench_core::{ActivityBuilder, ActivitySummary, ResultCollector};
use serde::Serialize;

use super::{load_config, Mode, RunArgs};
use crate::workload::{Profile, SimulatedDriver, SimulatedStatement};

/// JSON document written at the end of a run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub summary: ActivitySummary,
    pub result_codes: BTreeMap<i32, usize>,
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = args.apply(load_config(args.config.as_deref())?);
    let profile = Profile {
        latency: Duration::from_millis(args.latency_ms),
        jitter: Duration::from_millis(args.jitter_ms),
        fail_rate: args.fail_rate,
        not_applied_cycle: args.not_applied_cycle,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cycle-bench-io")
        .build()
        .context("building tokio runtime")?;

    let collector = Arc::new(ResultCollector::new());
    let builder = ActivityBuilder::new()
        .config(config)
        .output(collector.clone());
    let builder = match args.mode {
        Mode::Sync => builder.action(move |_slot| SimulatedStatement::action(profile)),
        Mode::Async => builder.async_action(SimulatedDriver::new(profile, runtime.handle().clone())),
    };
    let activity = builder.build().context("building activity")?;

    let stopper = activity.stop_handle();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping activity");
            stopper.request_stop();
        }
    });

    let summary = match args.timeout_secs {
        Some(secs) => activity.run_with_timeout(Duration::from_secs(secs))?,
        None => activity.run()?,
    };

    let report = RunReport {
        summary,
        result_codes: collector.result_code_counts(),
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing report {}", path.display()))?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }

    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}
