//! Common pot accounting
//!
//! The balance is recomputed from the ledger on every call, there is no running
//! counter to drift.

use std::collections::HashSet;
use std::sync::Arc;

use commonpot_shared::{Clock, PaymentType};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Payment, PotUsage};
use crate::store::LedgerStore;

/// Revenue and expenses of the common pot, in minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PotBalance {
    pub revenue: i64,
    pub expenses: i64,
}

impl PotBalance {
    pub fn available(&self) -> i64 {
        self.revenue - self.expenses
    }
}

/// Aggregate the pot from raw ledger rows
///
/// Revenue counts completed common pot payments, minus those referenced by a
/// credit. Expenses count completed usages.
pub fn compute_balance(payments: &[Payment], usages: &[PotUsage]) -> PotBalance {
    let refunded: HashSet<Uuid> = payments
        .iter()
        .filter(|p| p.payment_type == PaymentType::Credit)
        .filter_map(|p| p.credited_payment_id)
        .collect();

    let revenue = payments
        .iter()
        .filter(|p| p.payment_type == PaymentType::CommonPot)
        .filter(|p| p.is_completed() && !refunded.contains(&p.id))
        .map(|p| p.amount)
        .sum();

    let expenses = usages
        .iter()
        .filter(|u| u.completed_at.is_some())
        .map(|u| u.amount)
        .sum();

    PotBalance { revenue, expenses }
}

#[derive(Clone)]
pub struct CommonPotService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl CommonPotService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn balance(&self) -> BillingResult<PotBalance> {
        // Credits are needed to know which contributions were refunded
        let mut payments = self.store.list_payments_by_type(PaymentType::CommonPot).await?;
        payments.extend(self.store.list_payments_by_type(PaymentType::Credit).await?);
        let usages = self.store.list_pot_usages().await?;

        Ok(compute_balance(&payments, &usages))
    }

    /// May be negative
    pub async fn available_balance(&self) -> BillingResult<i64> {
        Ok(self.balance().await?.available())
    }

    pub async fn revenue(&self) -> BillingResult<i64> {
        Ok(self.balance().await?.revenue)
    }

    pub async fn expenses(&self) -> BillingResult<i64> {
        Ok(self.balance().await?.expenses)
    }

    /// Draw `amount` from the pot on behalf of an account
    pub async fn record_usage(&self, account_id: Uuid, amount: i64) -> BillingResult<PotUsage> {
        if self.store.find_account(account_id).await?.is_none() {
            return Err(BillingError::AccountNotFound(account_id));
        }

        let usage = PotUsage::new(account_id, amount, self.clock.now())?;
        self.store.save_pot_usage(&usage).await?;

        tracing::info!(
            usage_id = %usage.id,
            account_id = %account_id,
            amount,
            "Recorded common pot usage"
        );
        Ok(usage)
    }
}
