//! In-memory ledger store
//!
//! One `tokio::sync::Mutex` guards the whole ledger, which serializes completions
//! and invoice-number allocation exactly like the Postgres advisory lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use commonpot_shared::{Frequency, PaymentType};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CompletedPayment, LedgerStore, Reassignment};
use crate::error::{BillingError, BillingResult};
use crate::invoice::{self, YearMonth};
use crate::models::{Account, Payment, PotUsage, Token};
use crate::subscription;

#[derive(Default)]
struct Ledger {
    accounts: HashMap<Uuid, Account>,
    payments: HashMap<Uuid, Payment>,
    pot_usages: HashMap<Uuid, PotUsage>,
    tokens: HashMap<String, Token>,
    /// Injected completion failures: remaining count and whether they are conflicts
    failing_completions: HashMap<Uuid, (u32, bool)>,
}

impl Ledger {
    fn last_invoice_number(&self) -> Option<String> {
        self.payments
            .values()
            .filter_map(|p| p.invoice_number.clone())
            .max()
    }

    fn sorted_payments<F>(&self, keep: F) -> Vec<Payment>
    where
        F: Fn(&Payment) -> bool,
    {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| keep(p))
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        payments
    }

    fn sorted_accounts<F>(&self, keep: F) -> Vec<Account>
    where
        F: Fn(&Account) -> bool,
    {
        let mut accounts: Vec<Account> = self
            .accounts
            .values()
            .filter(|a| keep(a))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        accounts
    }

    /// Consume one injected failure for `payment_id`, if any is left
    fn injected_failure(&mut self, payment_id: Uuid, number: &str) -> Option<BillingError> {
        let (remaining, conflict) = self.failing_completions.get_mut(&payment_id)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(if *conflict {
            BillingError::InvoiceNumberConflict(number.to_string())
        } else {
            BillingError::Database("completion rejected".to_string())
        })
    }
}

/// Ledger held in process memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    ledger: Mutex<Ledger>,
    fail_reassignment: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following reassignment fail, to exercise abort paths
    #[cfg(test)]
    pub(crate) fn fail_reassignments(&self, fail: bool) {
        self.fail_reassignment.store(fail, Ordering::SeqCst);
    }

    /// Make the next `times` completions of `payment_id` fail, as invoice
    /// number conflicts or as plain database errors
    #[cfg(test)]
    pub(crate) async fn fail_completions(&self, payment_id: Uuid, times: u32, conflict: bool) {
        let mut ledger = self.ledger.lock().await;
        ledger.failing_completions.insert(payment_id, (times, conflict));
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_account(&self, id: Uuid) -> BillingResult<Option<Account>> {
        Ok(self.ledger.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> BillingResult<Option<Account>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn list_accounts(&self) -> BillingResult<Vec<Account>> {
        Ok(self.ledger.lock().await.sorted_accounts(|_| true))
    }

    async fn list_managed_accounts(&self, manager_id: Uuid) -> BillingResult<Vec<Account>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.sorted_accounts(|a| a.managed_by == Some(manager_id)))
    }

    async fn list_reminder_candidates(&self) -> BillingResult<Vec<Account>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.sorted_accounts(|a| a.reminder && !a.is_free()))
    }

    async fn list_stale_account_ids(
        &self,
        synced_before: OffsetDateTime,
    ) -> BillingResult<Vec<Uuid>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .sorted_accounts(|a| {
                a.managed_by.is_none() && a.last_sync_at.map_or(true, |at| at < synced_before)
            })
            .into_iter()
            .map(|a| a.id)
            .collect())
    }

    async fn save_account(&self, account: &Account) -> BillingResult<()> {
        let mut ledger = self.ledger.lock().await;

        let email_taken = ledger
            .accounts
            .values()
            .any(|other| other.id != account.id && other.email == account.email);
        if email_taken {
            return Err(BillingError::EmailTaken(account.email.clone()));
        }
        if account.managed_by == Some(account.id) {
            return Err(BillingError::InvalidManager(format!(
                "account {} cannot manage itself",
                account.id
            )));
        }

        ledger.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn replace_access_token(
        &self,
        account_id: Uuid,
        token: &str,
    ) -> BillingResult<Option<String>> {
        let mut ledger = self.ledger.lock().await;
        let account = ledger
            .accounts
            .get_mut(&account_id)
            .ok_or(BillingError::AccountNotFound(account_id))?;
        Ok(account.access_token.replace(token.to_string()))
    }

    async fn extend_subscription(
        &self,
        account_id: Uuid,
        frequency: Frequency,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Account>> {
        let mut ledger = self.ledger.lock().await;

        let payer = ledger
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(BillingError::AccountNotFound(account_id))?;
        let managed = ledger.sorted_accounts(|a| a.managed_by == Some(account_id));

        let extended = subscription::apply_extension(&payer, &managed, frequency, now)?;
        for account in &extended {
            if let Some(stored) = ledger.accounts.get_mut(&account.id) {
                stored.expired_at = account.expired_at;
            }
        }

        Ok(extended)
    }

    async fn delete_accounts(&self, ids: &[Uuid]) -> BillingResult<u64> {
        let mut ledger = self.ledger.lock().await;

        let referenced = ledger
            .payments
            .values()
            .filter_map(|p| p.account_id)
            .chain(ledger.pot_usages.values().map(|u| u.account_id))
            .find(|owner| ids.contains(owner));
        if let Some(owner) = referenced {
            return Err(BillingError::Database(format!(
                "account {} still owns financial records",
                owner
            )));
        }

        let mut deleted = 0;
        for id in ids {
            if ledger.accounts.remove(id).is_some() {
                deleted += 1;
            }
        }
        for account in ledger.accounts.values_mut() {
            if account.managed_by.is_some_and(|manager| ids.contains(&manager)) {
                account.managed_by = None;
            }
        }

        Ok(deleted)
    }

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        Ok(self.ledger.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_session(&self, session_id: &str) -> BillingResult<Option<Payment>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .payments
            .values()
            .find(|p| p.session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn list_payments(&self) -> BillingResult<Vec<Payment>> {
        Ok(self.ledger.lock().await.sorted_payments(|_| true))
    }

    async fn list_payments_by_account(&self, account_id: Uuid) -> BillingResult<Vec<Payment>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.sorted_payments(|p| p.account_id == Some(account_id)))
    }

    async fn list_payments_by_type(
        &self,
        payment_type: PaymentType,
    ) -> BillingResult<Vec<Payment>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.sorted_payments(|p| p.payment_type == payment_type))
    }

    async fn list_payments_to_complete(&self) -> BillingResult<Vec<Payment>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.sorted_payments(Payment::awaits_completion))
    }

    async fn save_payment(&self, payment: &Payment) -> BillingResult<()> {
        let mut ledger = self.ledger.lock().await;

        if let Some(number) = &payment.invoice_number {
            let duplicate = ledger
                .payments
                .values()
                .any(|p| p.id != payment.id && p.invoice_number.as_ref() == Some(number));
            if duplicate {
                return Err(BillingError::InvoiceNumberConflict(number.clone()));
            }
        }

        ledger.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn last_invoice_number(&self) -> BillingResult<Option<String>> {
        Ok(self.ledger.lock().await.last_invoice_number())
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        completed_at: OffsetDateTime,
    ) -> BillingResult<Option<CompletedPayment>> {
        let mut ledger = self.ledger.lock().await;

        let mut payment = ledger
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(BillingError::PaymentNotFound(payment_id))?;
        if !payment.awaits_completion() {
            return Ok(None);
        }

        let number = invoice::allocate(
            ledger.last_invoice_number().as_deref(),
            YearMonth::from(completed_at),
        )?;
        if let Some(e) = ledger.injected_failure(payment_id, &number) {
            return Err(e);
        }
        if ledger
            .payments
            .values()
            .any(|p| p.invoice_number.as_ref() == Some(&number))
        {
            return Err(BillingError::InvoiceNumberConflict(number));
        }

        let mut extended_accounts = Vec::new();
        if let (PaymentType::Subscription, Some(account_id), Some(frequency)) =
            (payment.payment_type, payment.account_id, payment.frequency)
        {
            if let Some(payer) = ledger.accounts.get(&account_id).cloned() {
                let managed = ledger.sorted_accounts(|a| a.managed_by == Some(account_id));
                extended_accounts =
                    subscription::apply_extension(&payer, &managed, frequency, completed_at)?;
            }
        }

        // Everything is computed, nothing below can fail
        payment.completed_at = Some(completed_at);
        payment.invoice_number = Some(number);
        ledger.payments.insert(payment.id, payment.clone());
        for account in &extended_accounts {
            ledger.accounts.insert(account.id, account.clone());
        }

        Ok(Some(CompletedPayment {
            payment,
            extended_accounts,
        }))
    }

    async fn save_pot_usage(&self, usage: &PotUsage) -> BillingResult<()> {
        let mut ledger = self.ledger.lock().await;
        if !ledger.accounts.contains_key(&usage.account_id) {
            return Err(BillingError::AccountNotFound(usage.account_id));
        }
        ledger.pot_usages.insert(usage.id, usage.clone());
        Ok(())
    }

    async fn list_pot_usages(&self) -> BillingResult<Vec<PotUsage>> {
        let ledger = self.ledger.lock().await;
        let mut usages: Vec<PotUsage> = ledger.pot_usages.values().cloned().collect();
        usages.sort_by_key(|u| (u.created_at, u.id));
        Ok(usages)
    }

    async fn reassign_financial_records(
        &self,
        from: &[Uuid],
        to: Uuid,
    ) -> BillingResult<Reassignment> {
        let mut ledger = self.ledger.lock().await;

        if self.fail_reassignment.load(Ordering::SeqCst) {
            return Err(BillingError::Database("reassignment rejected".to_string()));
        }
        if !ledger.accounts.contains_key(&to) {
            return Err(BillingError::AccountNotFound(to));
        }

        let mut moved = Reassignment::default();
        for payment in ledger.payments.values_mut() {
            if payment.account_id.is_some_and(|owner| from.contains(&owner)) {
                payment.account_id = Some(to);
                moved.payments += 1;
            }
        }
        for usage in ledger.pot_usages.values_mut() {
            if from.contains(&usage.account_id) {
                usage.account_id = to;
                moved.pot_usages += 1;
            }
        }

        Ok(moved)
    }

    async fn save_token(&self, token: &Token) -> BillingResult<()> {
        let mut ledger = self.ledger.lock().await;
        ledger.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find_token(&self, value: &str) -> BillingResult<Option<Token>> {
        Ok(self.ledger.lock().await.tokens.get(value).cloned())
    }

    async fn delete_token(&self, value: &str) -> BillingResult<bool> {
        let mut ledger = self.ledger.lock().await;
        let removed = ledger.tokens.remove(value).is_some();
        if removed {
            for account in ledger.accounts.values_mut() {
                if account.access_token.as_deref() == Some(value) {
                    account.access_token = None;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let mut ledger = self.ledger.lock().await;

        let expired: Vec<String> = ledger
            .tokens
            .values()
            .filter(|t| !t.is_valid(now))
            .map(|t| t.token.clone())
            .collect();

        for value in &expired {
            ledger.tokens.remove(value);
        }
        for account in ledger.accounts.values_mut() {
            if account
                .access_token
                .as_ref()
                .is_some_and(|value| expired.contains(value))
            {
                account.access_token = None;
            }
        }

        Ok(expired.len() as u64)
    }
}
