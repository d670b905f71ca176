//! Ledger persistence
//!
//! `LedgerStore` is the single shared mutable resource of the engine. Every
//! multi-row write that must be all-or-nothing (payment completion together with
//! its invoice number and subscription extension, reassignment of financial
//! records) is a single store operation so implementations can make it
//! transactional.

use async_trait::async_trait;
use commonpot_shared::{Frequency, PaymentType};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{Account, Payment, PotUsage, Token};

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Outcome of a successful completion claim
#[derive(Debug, Clone)]
pub struct CompletedPayment {
    /// The payment with `completed_at` and `invoice_number` set
    pub payment: Payment,
    /// Accounts whose expiration moved, payer first
    pub extended_accounts: Vec<Account>,
}

/// Rows moved by a reassignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub payments: u64,
    pub pot_usages: u64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_account(&self, id: Uuid) -> BillingResult<Option<Account>>;

    async fn find_account_by_email(&self, email: &str) -> BillingResult<Option<Account>>;

    async fn list_accounts(&self) -> BillingResult<Vec<Account>>;

    async fn list_managed_accounts(&self, manager_id: Uuid) -> BillingResult<Vec<Account>>;

    /// Accounts with reminders enabled, free accounts excluded
    async fn list_reminder_candidates(&self) -> BillingResult<Vec<Account>>;

    /// Unmanaged accounts never synchronized or last synchronized before `synced_before`
    async fn list_stale_account_ids(
        &self,
        synced_before: OffsetDateTime,
    ) -> BillingResult<Vec<Uuid>>;

    /// Insert or update; a duplicate email is `BillingError::EmailTaken`
    async fn save_account(&self, account: &Account) -> BillingResult<()>;

    /// Point the account at a new login token, returning the one it replaced
    ///
    /// Only `access_token` is written, so a concurrent extension is never undone.
    async fn replace_access_token(
        &self,
        account_id: Uuid,
        token: &str,
    ) -> BillingResult<Option<String>>;

    /// Extend an account and the accounts it manages by one period
    ///
    /// Rows are locked for the duration and only `expired_at` is written.
    /// Returns the accounts whose expiration moved, payer first.
    async fn extend_subscription(
        &self,
        account_id: Uuid,
        frequency: Frequency,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Account>>;

    /// Delete accounts, failing if any still owns payments or pot usages
    async fn delete_accounts(&self, ids: &[Uuid]) -> BillingResult<u64>;

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<Payment>>;

    async fn find_payment_by_session(&self, session_id: &str) -> BillingResult<Option<Payment>>;

    async fn list_payments(&self) -> BillingResult<Vec<Payment>>;

    async fn list_payments_by_account(&self, account_id: Uuid) -> BillingResult<Vec<Payment>>;

    async fn list_payments_by_type(&self, payment_type: PaymentType) -> BillingResult<Vec<Payment>>;

    /// Paid payments without `completed_at`, oldest first
    async fn list_payments_to_complete(&self) -> BillingResult<Vec<Payment>>;

    /// Insert or update a payment that is not completed by this call
    async fn save_payment(&self, payment: &Payment) -> BillingResult<()>;

    /// Greatest invoice number issued so far, all payment types included
    async fn last_invoice_number(&self) -> BillingResult<Option<String>>;

    /// Atomically complete a paid payment
    ///
    /// Within one serialized unit: re-check that the payment is paid and not
    /// completed, allocate the next invoice number for the month of
    /// `completed_at`, set both fields and, for subscriptions with an owner,
    /// extend the owner and the accounts it manages. Returns `None` without
    /// writing anything when the payment is already completed or not paid.
    async fn complete_payment(
        &self,
        payment_id: Uuid,
        completed_at: OffsetDateTime,
    ) -> BillingResult<Option<CompletedPayment>>;

    async fn save_pot_usage(&self, usage: &PotUsage) -> BillingResult<()>;

    async fn list_pot_usages(&self) -> BillingResult<Vec<PotUsage>>;

    /// Point every payment and pot usage owned by `from` at `to`
    ///
    /// Zero rows moved is a success. Any error means nothing may be deleted.
    async fn reassign_financial_records(
        &self,
        from: &[Uuid],
        to: Uuid,
    ) -> BillingResult<Reassignment>;

    async fn save_token(&self, token: &Token) -> BillingResult<()>;

    async fn find_token(&self, value: &str) -> BillingResult<Option<Token>>;

    async fn delete_token(&self, value: &str) -> BillingResult<bool>;

    /// Delete tokens expired at `now`, clearing account references to them
    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> BillingResult<u64>;
}
