// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Common Pot Background Worker
//!
//! Runs the ledger sweeps on their own schedules:
//! - Payment completion (near-immediate polling)
//! - Idle account reclamation (daily)
//! - Subscription reminders (daily)
//! - Expired login token purge (daily)
//! - Ledger invariant checks (daily)

mod sweeps;

use std::future::Future;
use std::sync::Arc;

use commonpot_billing::{BillingService, PgLedgerStore};
use commonpot_shared::{create_pool, run_migrations, Config, SystemClock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use sweeps::SweepGuard;

/// Schedule one guarded sweep
async fn schedule<F, Fut>(
    scheduler: &JobScheduler,
    billing: &Arc<BillingService>,
    name: &'static str,
    cron: &str,
    sweep: F,
) -> anyhow::Result<()>
where
    F: Fn(Arc<BillingService>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let guard = SweepGuard::new(name);
    let billing = billing.clone();

    scheduler
        .add(Job::new_async(cron, move |_uuid, _l| {
            let guard = guard.clone();
            let billing = billing.clone();
            let sweep = sweep.clone();
            Box::pin(async move {
                guard.run(|| sweep(billing)).await;
            })
        })?)
        .await?;

    info!(sweep = name, cron, "Scheduled sweep");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Common Pot Worker");

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    run_migrations(&pool).await?;

    let billing = Arc::new(BillingService::from_config(
        Arc::new(PgLedgerStore::new(pool.clone())),
        Arc::new(SystemClock),
        &config,
    ));
    let default_account = billing.bootstrap().await?;
    info!(account_id = %default_account.id, "Default account ready");

    let mut scheduler = JobScheduler::new().await?;

    schedule(&scheduler, &billing, "completion", &config.completion_schedule, |b| async move {
        sweeps::complete_payments(&b).await
    })
    .await?;
    schedule(&scheduler, &billing, "reclamation", &config.reclamation_schedule, |b| async move {
        sweeps::reclaim_accounts(&b).await
    })
    .await?;
    schedule(&scheduler, &billing, "reminder", &config.reminder_schedule, |b| async move {
        sweeps::send_reminders(&b).await
    })
    .await?;
    schedule(&scheduler, &billing, "token_purge", &config.token_purge_schedule, |b| async move {
        sweeps::purge_tokens(&b).await
    })
    .await?;
    schedule(&scheduler, &billing, "invariants", &config.invariant_schedule, |b| async move {
        sweeps::check_invariants(&b).await
    })
    .await?;

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("Common Pot Worker started successfully with 5 scheduled sweeps");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");

    scheduler.shutdown().await?;
    pool.close().await;

    Ok(())
}
