//! Idle account reclamation
//!
//! Accounts that stopped synchronizing are deleted after their payments and pot
//! usages have been moved to the default account. Reassignment must succeed
//! before anything is deleted; a failure aborts the whole run.

use std::collections::BTreeSet;
use std::sync::Arc;

use commonpot_shared::Clock;
use serde::Serialize;
use time::Duration;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{LedgerStore, Reassignment};

/// Result of one reclamation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclamationReport {
    /// Stale unmanaged accounts
    pub stale_accounts: usize,
    /// Accounts removed because their manager was stale
    pub managed_accounts: usize,
    pub reassigned: Reassignment,
    pub deleted: u64,
}

#[derive(Clone)]
pub struct AccountCleaner {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    default_account_id: Uuid,
    stale_after: Duration,
}

impl AccountCleaner {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        default_account_id: Uuid,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            default_account_id,
            stale_after,
        }
    }

    /// Stale roots first, then the accounts they manage
    async fn collect(&self) -> BillingResult<(Vec<Uuid>, Vec<Uuid>)> {
        let threshold = self.clock.now() - self.stale_after;

        let roots: Vec<Uuid> = self
            .store
            .list_stale_account_ids(threshold)
            .await?
            .into_iter()
            .filter(|id| *id != self.default_account_id)
            .collect();

        let mut managed = BTreeSet::new();
        for root in &roots {
            for account in self.store.list_managed_accounts(*root).await? {
                if account.id != self.default_account_id {
                    managed.insert(account.id);
                }
            }
        }

        Ok((roots, managed.into_iter().collect()))
    }

    pub async fn reclaim(&self) -> BillingResult<ReclamationReport> {
        let (roots, managed) = self.collect().await?;
        let mut report = ReclamationReport {
            stale_accounts: roots.len(),
            managed_accounts: managed.len(),
            ..Default::default()
        };

        if roots.is_empty() {
            tracing::debug!("No stale accounts to reclaim");
            return Ok(report);
        }

        if self.store.find_account(self.default_account_id).await?.is_none() {
            return Err(BillingError::MissingDefaultAccount(self.default_account_id));
        }

        let ids: Vec<Uuid> = roots.into_iter().chain(managed).collect();

        report.reassigned = self
            .store
            .reassign_financial_records(&ids, self.default_account_id)
            .await
            .map_err(|e| {
                tracing::error!(
                    accounts = ids.len(),
                    error = %e,
                    "Reassignment to default account failed, aborting reclamation"
                );
                BillingError::ReassignmentFailed(e.to_string())
            })?;

        report.deleted = self.store.delete_accounts(&ids).await?;

        tracing::info!(
            stale_accounts = report.stale_accounts,
            managed_accounts = report.managed_accounts,
            payments = report.reassigned.payments,
            pot_usages = report.reassigned.pot_usages,
            deleted = report.deleted,
            "Reclaimed idle accounts"
        );

        Ok(report)
    }
}
