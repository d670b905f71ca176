//! Sweep jobs run by the scheduler

use std::future::Future;
use std::sync::Arc;

use commonpot_billing::BillingService;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Prevents a sweep from overlapping its own previous run
#[derive(Clone)]
pub struct SweepGuard {
    name: &'static str,
    running: Arc<Mutex<()>>,
}

impl SweepGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run `sweep` unless the previous run is still going; returns whether it ran
    pub async fn run<F, Fut>(&self, sweep: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let Ok(_running) = self.running.try_lock() else {
            warn!(sweep = self.name, "Previous run still in progress, skipping");
            return false;
        };
        sweep().await;
        true
    }
}

pub async fn complete_payments(billing: &BillingService) {
    match billing.completion.complete_pending().await {
        Ok(summary) if !summary.deferred.is_empty() => {
            warn!(
                completed = summary.completed,
                deferred = summary.deferred.len(),
                "Some payments could not be completed, retrying next sweep"
            );
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Completion sweep failed"),
    }
}

pub async fn reclaim_accounts(billing: &BillingService) {
    info!("Running idle account reclamation");
    match billing.cleaner.reclaim().await {
        Ok(report) => info!(
            stale_accounts = report.stale_accounts,
            managed_accounts = report.managed_accounts,
            deleted = report.deleted,
            "Reclamation complete"
        ),
        // Nothing was deleted; the whole run is retried next time
        Err(e) => error!(error = %e, "Reclamation aborted"),
    }
}

pub async fn send_reminders(billing: &BillingService) {
    info!("Running subscription reminders");
    if let Err(e) = billing.reminders.send_reminders().await {
        error!(error = %e, "Reminder sweep failed");
    }
}

pub async fn purge_tokens(billing: &BillingService) {
    if let Err(e) = billing.tokens.purge_expired().await {
        error!(error = %e, "Token purge failed");
    }
}

pub async fn check_invariants(billing: &BillingService) {
    match billing.invariants.run_all_checks().await {
        Ok(summary) if summary.healthy => {
            info!(checks_run = summary.checks_run, "Ledger invariants hold");
        }
        Ok(summary) => {
            for violation in &summary.violations {
                error!(
                    invariant = %violation.invariant,
                    severity = %violation.severity,
                    ids = ?violation.ids,
                    "{}",
                    violation.description
                );
            }
            warn!(
                checks_failed = summary.checks_failed,
                violations = summary.violations.len(),
                "Ledger invariant violations found"
            );
        }
        Err(e) => error!(error = %e, "Invariant check failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_guard_skips_overlapping_run() {
        let guard = SweepGuard::new("test");
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, wait) = oneshot::channel::<()>();

        let first = {
            let guard = guard.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                guard
                    .run(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        let _ = wait.await;
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        while runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let runs_second = runs.clone();
        let ran = guard
            .run(|| async move {
                runs_second.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(!ran);

        release.send(()).unwrap();
        assert!(first.await.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // free again once the first run finished
        assert!(guard.run(|| async {}).await);
    }
}
