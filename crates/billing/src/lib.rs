// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries owned context strings
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Common Pot Billing Module
//!
//! Ledger of accounts, payments, common pot usages and login tokens, plus the
//! periodic workflows that keep it consistent.
//!
//! ## Features
//!
//! - **Invoice Numbering**: `YYYY-MM-NNNN`, monotonic within a calendar month
//! - **Subscriptions**: Calendar-month extensions cascading to managed accounts
//! - **Common Pot**: Balance of completed contributions minus usages
//! - **Completion Sweep**: Idempotent `paid → completed` with invoice and email
//! - **Reclamation**: Idle accounts handed to the default account, then deleted
//! - **Reminders**: Ending/ended notices with a 24 hour login link
//! - **Invariants**: Read-only consistency checks over the ledger

pub mod accounts;
pub mod artifact;
pub mod completion;
pub mod email;
pub mod error;
pub mod invariants;
pub mod invoice;
pub mod models;
pub mod payments;
pub mod pot;
pub mod reclamation;
pub mod reminder;
pub mod store;
pub mod subscription;
pub mod tokens;

#[cfg(test)]
mod test_support;

// Accounts
pub use accounts::AccountService;

// Artifacts
pub use artifact::{InvoiceArchive, InvoiceRenderer, JsonInvoiceRenderer};

// Completion
pub use completion::{CompletionOutcome, CompletionSummary, PaymentCompletionService};

// Email
pub use email::{BillingEmailService, EmailMessage, Mailer, ResendMailer};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Invoice numbering
pub use invoice::YearMonth;

// Models
pub use models::{Account, Address, Payment, PaymentStatus, PotUsage, Token};

// Payments
pub use payments::{GatewaySignal, PaymentService};

// Common pot
pub use pot::{CommonPotService, PotBalance};

// Reclamation
pub use reclamation::{AccountCleaner, ReclamationReport};

// Reminders
pub use reminder::{ReminderKind, ReminderService, ReminderSummary};

// Store
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};

// Subscriptions
pub use subscription::SubscriptionAccounting;

// Tokens
pub use tokens::TokenService;

use std::sync::Arc;

use commonpot_shared::{Clock, Config};
use time::Duration;
use uuid::Uuid;

/// Deployment-specific knobs of the ledger workflows
#[derive(Debug, Clone)]
pub struct BillingSettings {
    /// Account inheriting the records of reclaimed accounts
    pub default_account_id: Uuid,
    pub default_account_email: String,
    /// Accounts not synced for this long are stale
    pub stale_after: Duration,
}

impl BillingSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_account_id: config.default_account_id,
            default_account_email: config.default_account_email.clone(),
            stale_after: Duration::days(config.stale_account_days),
        }
    }
}

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub accounts: AccountService,
    pub archive: InvoiceArchive,
    pub cleaner: AccountCleaner,
    pub completion: PaymentCompletionService,
    pub email: BillingEmailService,
    pub invariants: InvariantChecker,
    pub payments: PaymentService,
    pub pot: CommonPotService,
    pub reminders: ReminderService,
    pub subscriptions: SubscriptionAccounting,
    pub tokens: TokenService,
    settings: BillingSettings,
}

impl BillingService {
    /// Create a new billing service from loaded configuration
    pub fn from_config(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self::new(
            store,
            clock,
            BillingEmailService::from_config(config),
            InvoiceArchive::new(&config.invoices_path, Arc::new(JsonInvoiceRenderer)),
            BillingSettings::from_config(config),
        )
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        email: BillingEmailService,
        archive: InvoiceArchive,
        settings: BillingSettings,
    ) -> Self {
        let accounts = AccountService::new(store.clone(), clock.clone());

        Self {
            payments: PaymentService::new(store.clone(), clock.clone(), accounts.clone()),
            accounts,
            cleaner: AccountCleaner::new(
                store.clone(),
                clock.clone(),
                settings.default_account_id,
                settings.stale_after,
            ),
            completion: PaymentCompletionService::new(
                store.clone(),
                clock.clone(),
                archive.clone(),
                email.clone(),
            ),
            invariants: InvariantChecker::new(store.clone(), clock.clone()),
            pot: CommonPotService::new(store.clone(), clock.clone()),
            reminders: ReminderService::new(
                store.clone(),
                clock.clone(),
                email.clone(),
                settings.stale_after,
            ),
            subscriptions: SubscriptionAccounting::new(store.clone(), clock.clone()),
            tokens: TokenService::new(store, clock),
            archive,
            email,
            settings,
        }
    }

    pub fn settings(&self) -> &BillingSettings {
        &self.settings
    }

    /// Make sure the default account exists before any sweep runs
    pub async fn bootstrap(&self) -> BillingResult<Account> {
        self.accounts
            .ensure_default_account(
                self.settings.default_account_id,
                &self.settings.default_account_email,
            )
            .await
    }
}
