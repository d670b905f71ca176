//! Ledger Invariants Module
//!
//! Provides runnable consistency checks for the ledger. These invariants can be
//! run after any sweep or replayed gateway signal to ensure the ledger is in a
//! valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is computed from the store's own rows
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use commonpot_shared::{Clock, PaymentType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{Account, Payment, PotUsage};
use crate::store::LedgerStore;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Accounts or payments affected
    pub ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - invoices or balances are wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Rows every check reads from
struct Snapshot {
    accounts: Vec<Account>,
    payments: Vec<Payment>,
    usages: Vec<PotUsage>,
}

type Check = fn(&Snapshot) -> Vec<InvariantViolation>;

const CHECKS: [(&str, Check); 5] = [
    ("completion_has_invoice_number", check_completion_has_invoice_number),
    ("unique_invoice_numbers", check_unique_invoice_numbers),
    ("financial_rows_reference_accounts", check_financial_rows_reference_accounts),
    ("managed_accounts_single_level", check_managed_accounts_single_level),
    ("credits_reference_completed_payment", check_credits_reference_completed_payment),
];

/// Service for running ledger invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn snapshot(&self) -> BillingResult<Snapshot> {
        Ok(Snapshot {
            accounts: self.store.list_accounts().await?,
            payments: self.store.list_payments().await?,
            usages: self.store.list_pot_usages().await?,
        })
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let snapshot = self.snapshot().await?;
        let violations: Vec<InvariantViolation> =
            CHECKS.iter().flat_map(|(_, check)| check(&snapshot)).collect();

        let checks_run = CHECKS.len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: self.clock.now(),
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        let Some((_, check)) = CHECKS.iter().find(|(check_name, _)| *check_name == name) else {
            return Ok(vec![]);
        };
        Ok(check(&self.snapshot().await?))
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.iter().map(|(name, _)| *name).collect()
    }
}

/// Invariant 1: completed_at and invoice_number are set together
fn check_completion_has_invoice_number(snapshot: &Snapshot) -> Vec<InvariantViolation> {
    snapshot
        .payments
        .iter()
        .filter(|p| p.completed_at.is_some() != p.invoice_number.is_some())
        .map(|p| InvariantViolation {
            invariant: "completion_has_invoice_number".to_string(),
            ids: vec![p.id],
            description: if p.completed_at.is_some() {
                "Completed payment has no invoice number".to_string()
            } else {
                "Uncompleted payment carries an invoice number".to_string()
            },
            context: serde_json::json!({
                "completed_at": p.completed_at.map(|at| at.to_string()),
                "invoice_number": p.invoice_number,
            }),
            severity: ViolationSeverity::Critical,
        })
        .collect()
}

/// Invariant 2: an invoice number belongs to at most one payment
fn check_unique_invoice_numbers(snapshot: &Snapshot) -> Vec<InvariantViolation> {
    let mut by_number: HashMap<&str, Vec<Uuid>> = HashMap::new();
    for payment in &snapshot.payments {
        if let Some(number) = &payment.invoice_number {
            by_number.entry(number.as_str()).or_default().push(payment.id);
        }
    }

    let mut violations: Vec<InvariantViolation> = by_number
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(number, ids)| InvariantViolation {
            invariant: "unique_invoice_numbers".to_string(),
            description: format!("Invoice number {} used by {} payments", number, ids.len()),
            context: serde_json::json!({ "invoice_number": number }),
            ids,
            severity: ViolationSeverity::Critical,
        })
        .collect();
    violations.sort_by(|a, b| a.description.cmp(&b.description));
    violations
}

/// Invariant 3: payments and pot usages never point at a missing account
fn check_financial_rows_reference_accounts(snapshot: &Snapshot) -> Vec<InvariantViolation> {
    let known: HashSet<Uuid> = snapshot.accounts.iter().map(|a| a.id).collect();

    let payments = snapshot
        .payments
        .iter()
        .filter_map(|p| p.account_id.map(|owner| (p.id, owner, "payment")));
    let usages = snapshot
        .usages
        .iter()
        .map(|u| (u.id, u.account_id, "pot_usage"));

    payments
        .chain(usages)
        .filter(|(_, owner, _)| !known.contains(owner))
        .map(|(id, owner, kind)| InvariantViolation {
            invariant: "financial_rows_reference_accounts".to_string(),
            ids: vec![id, owner],
            description: format!("{} references missing account {}", kind, owner),
            context: serde_json::json!({ "kind": kind }),
            severity: ViolationSeverity::Critical,
        })
        .collect()
}

/// Invariant 4: a managing account is never itself managed
fn check_managed_accounts_single_level(snapshot: &Snapshot) -> Vec<InvariantViolation> {
    let by_id: HashMap<Uuid, &Account> = snapshot.accounts.iter().map(|a| (a.id, a)).collect();

    snapshot
        .accounts
        .iter()
        .filter_map(|account| {
            let manager = by_id.get(&account.managed_by?)?;
            let grand_manager = manager.managed_by?;
            Some(InvariantViolation {
                invariant: "managed_accounts_single_level".to_string(),
                ids: vec![account.id, manager.id],
                description: "Account is managed by an account that is itself managed".to_string(),
                context: serde_json::json!({ "grand_manager": grand_manager }),
                severity: ViolationSeverity::Medium,
            })
        })
        .collect()
}

/// Invariant 5: credits refund a completed, non-credit payment, once
fn check_credits_reference_completed_payment(snapshot: &Snapshot) -> Vec<InvariantViolation> {
    let by_id: HashMap<Uuid, &Payment> = snapshot.payments.iter().map(|p| (p.id, p)).collect();
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut violations = Vec::new();

    for credit in snapshot
        .payments
        .iter()
        .filter(|p| p.payment_type == PaymentType::Credit)
    {
        let problem = match credit.credited_payment_id {
            None => Some("Credit does not reference a payment".to_string()),
            Some(target) => match by_id.get(&target) {
                None => Some(format!("Credit references missing payment {}", target)),
                Some(original) if original.payment_type == PaymentType::Credit => {
                    Some("Credit refunds another credit".to_string())
                }
                Some(original) if !original.is_completed() => {
                    Some("Credit refunds an uncompleted payment".to_string())
                }
                Some(_) if !seen.insert(target) => {
                    Some(format!("Payment {} credited twice", target))
                }
                Some(_) => None,
            },
        };

        if let Some(description) = problem {
            violations.push(InvariantViolation {
                invariant: "credits_reference_completed_payment".to_string(),
                ids: vec![credit.id],
                description,
                context: serde_json::json!({ "credited_payment_id": credit.credited_payment_id }),
                severity: ViolationSeverity::High,
            });
        }
    }

    violations
}
