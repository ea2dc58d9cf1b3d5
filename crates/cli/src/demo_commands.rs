use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    serde_json::{Value, json},
    tickwork_config::TickworkConfig,
    tickwork_cron::{JobRecord, JobSpec, LeaseTable, MemoryStore, Scheduler},
    tracing::{info, warn},
};

/// Scheduler and store wired from config.
fn build(config: &TickworkConfig) -> Result<(Scheduler, MemoryStore<Arc<JobRecord>>)> {
    let store = MemoryStore::with_capacity(config.store.capacity)?;
    let scheduler = Scheduler::from_config(Arc::new(store.clone()), config)?;
    Ok((scheduler, store))
}

/// Register the sample jobs. Safe to call again: existing names are left
/// untouched.
fn register_sample_jobs(scheduler: &Scheduler, leases: &LeaseTable) -> Result<()> {
    scheduler.run_spec(JobSpec::new("heartbeat", 2, |record, _| {
        info!(runs = record.runs_so_far(), "heartbeat");
        Ok(())
    }));

    if leases.is_held("report") {
        warn!("report lease still held, skipping registration");
    } else {
        scheduler.run_spec(
            JobSpec::new("report", 3, |record, args| {
                info!(run = record.runs_so_far() + 1, of = record.max_runs(), ?args, "building report");
                Ok(())
            })
            .max_runs(3)
            .lock(leases.attach("report")?)
            .args(vec![json!("daily"), json!({ "format": "csv" })]),
        );
    }

    scheduler.run_spec(
        JobSpec::new("backoff", 1, |record, args| {
            let attempt = args.first().and_then(Value::as_u64).unwrap_or_default();
            record.set_args(vec![json!(attempt + 1)]);
            record.set_interval_secs((record.interval_secs() * 2).min(8));
            anyhow::ensure!(attempt >= 2, "upstream not ready (attempt {attempt})");
            info!(attempt, "upstream ready");
            record.finish();
            Ok(())
        })
        .args(vec![json!(0)]),
    );
    Ok(())
}

fn print_status(scheduler: &Scheduler) -> Result<()> {
    let jobs: Vec<_> = scheduler
        .job_names()
        .iter()
        .filter_map(|name| scheduler.snapshot(name))
        .collect();
    let report = json!({ "status": scheduler.status(), "jobs": jobs });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn run_demo(config: &TickworkConfig, seconds: u64) -> Result<()> {
    let (scheduler, _store) = build(config)?;
    let leases = LeaseTable::new();
    register_sample_jobs(&scheduler, &leases)?;

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {},
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    print_status(&scheduler)?;
    scheduler.stop_all();
    info!("all jobs stopped");
    Ok(())
}

pub async fn run_teardown(config: &TickworkConfig, after: u64) -> Result<()> {
    let (scheduler, store) = build(config)?;
    let leases = LeaseTable::new();
    register_sample_jobs(&scheduler, &leases)?;

    tokio::time::sleep(Duration::from_secs(after)).await;
    let removed = store.teardown();
    info!(removed, remaining = scheduler.job_names().len(), "store torn down");

    // Stand-in for the bootstrap endpoint: register everything again.
    register_sample_jobs(&scheduler, &leases)?;
    tokio::time::sleep(Duration::from_secs(after)).await;

    print_status(&scheduler)?;
    scheduler.stop_all();
    Ok(())
}
