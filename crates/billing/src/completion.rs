//! Payment completion workflow
//!
//! `paid → completed` is owned by a periodic sweep. Invoice numbering and the
//! subscription extension are committed together by the store; the invoice
//! artifact and the notification come afterwards and never undo that commit.

use std::sync::Arc;
use std::time::Duration;

use commonpot_shared::Clock;
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::artifact::InvoiceArchive;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::store::{CompletedPayment, LedgerStore};

/// Attempts of the atomic completion step when invoice numbers collide
const MAX_CONFLICT_RETRIES: usize = 3;

/// What happened to one payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed {
        invoice_number: String,
        /// Accounts whose expiration moved
        extended_accounts: usize,
        invoice_rendered: bool,
        notified: bool,
    },
    /// Completed earlier, nothing was touched
    AlreadyCompleted,
    /// Still pending at the gateway
    NotPaid,
}

/// Result of one completion sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionSummary {
    pub candidates: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Payments left paid for the next sweep
    pub deferred: Vec<Uuid>,
}

#[derive(Clone)]
pub struct PaymentCompletionService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    archive: InvoiceArchive,
    email: BillingEmailService,
}

impl PaymentCompletionService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        archive: InvoiceArchive,
        email: BillingEmailService,
    ) -> Self {
        Self {
            store,
            clock,
            archive,
            email,
        }
    }

    /// Number the payment and extend the subscription in one store operation
    async fn claim(&self, payment_id: Uuid) -> BillingResult<Option<CompletedPayment>> {
        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_millis(200))
            .map(jitter)
            .take(MAX_CONFLICT_RETRIES);

        RetryIf::spawn(
            strategy,
            || self.store.complete_payment(payment_id, self.clock.now()),
            |e: &BillingError| {
                if e.is_retryable() {
                    tracing::warn!(
                        payment_id = %payment_id,
                        error = %e,
                        "Retrying payment completion"
                    );
                }
                e.is_retryable()
            },
        )
        .await
    }

    /// Complete one paid payment
    ///
    /// Re-running it on a completed payment is detected before any side effect.
    pub async fn complete(&self, payment_id: Uuid) -> BillingResult<CompletionOutcome> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or(BillingError::PaymentNotFound(payment_id))?;

        if payment.is_completed() {
            return Ok(CompletionOutcome::AlreadyCompleted);
        }
        if !payment.is_paid {
            return Ok(CompletionOutcome::NotPaid);
        }

        let Some(CompletedPayment {
            payment,
            extended_accounts,
        }) = self.claim(payment_id).await?
        else {
            // A concurrent run got there first
            return Ok(CompletionOutcome::AlreadyCompleted);
        };

        let invoice_number = payment.invoice_number.clone().unwrap_or_default();
        tracing::info!(
            payment_id = %payment.id,
            invoice_number = %invoice_number,
            payment_type = %payment.payment_type,
            extended_accounts = extended_accounts.len(),
            "Payment completed"
        );

        let account = match payment.account_id {
            Some(account_id) => match self.store.find_account(account_id).await {
                Ok(account) => account,
                Err(e) => {
                    tracing::error!(
                        payment_id = %payment.id,
                        error = %e,
                        "Failed to load payment owner"
                    );
                    None
                }
            },
            None => None,
        };

        let attachment = match self.archive.ensure(&payment, account.as_ref()).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(
                    payment_id = %payment.id,
                    error = %e,
                    "Failed to render invoice, it will be rendered on next access"
                );
                None
            }
        };
        let invoice_rendered = attachment.is_some();

        let notified = match &account {
            Some(account) => self.email.send_invoice(account, &payment, attachment).await,
            None => false,
        };

        Ok(CompletionOutcome::Completed {
            invoice_number,
            extended_accounts: extended_accounts.len(),
            invoice_rendered,
            notified,
        })
    }

    /// Complete every paid payment that is not completed yet
    ///
    /// A failing payment is deferred to the next sweep without stopping the
    /// others.
    pub async fn complete_pending(&self) -> BillingResult<CompletionSummary> {
        let candidates = self.store.list_payments_to_complete().await?;
        let mut summary = CompletionSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for payment in candidates {
            match self.complete(payment.id).await {
                Ok(CompletionOutcome::Completed { .. }) => summary.completed += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        payment_id = %payment.id,
                        error = %e,
                        "Payment completion failed, deferring to next sweep"
                    );
                    summary.deferred.push(payment.id);
                }
            }
        }

        if summary.candidates > 0 {
            tracing::info!(
                candidates = summary.candidates,
                completed = summary.completed,
                skipped = summary.skipped,
                deferred = summary.deferred.len(),
                "Completion sweep finished"
            );
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, RecordingMailer};
    use commonpot_shared::Frequency;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_sweep_numbers_in_creation_order() {
        let fx = Fixture::new().await;
        let account = fx.account("payer@example.org", datetime!(2024-05-01 00:00 UTC)).await;

        let first = fx.paid_contribution(Some(&account), 700).await;
        fx.clock.advance(time::Duration::minutes(1));
        let second = fx.paid_subscription(&account, Frequency::Month).await;
        fx.clock.advance(time::Duration::minutes(1));
        let third = fx.paid_contribution(None, 100).await;

        let summary = fx.billing.completion.complete_pending().await.unwrap();
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.completed, 3);
        assert!(summary.deferred.is_empty());

        assert_eq!(fx.payment(first.id).await.invoice_number.as_deref(), Some("2024-03-0001"));
        assert_eq!(fx.payment(second.id).await.invoice_number.as_deref(), Some("2024-03-0002"));
        assert_eq!(fx.payment(third.id).await.invoice_number.as_deref(), Some("2024-03-0003"));
    }

    #[tokio::test]
    async fn test_subscription_completion_extends_and_notifies() {
        let fx = Fixture::new().await;
        let account = fx.account("payer@example.org", datetime!(2024-04-01 00:00 UTC)).await;
        let payment = fx.paid_subscription(&account, Frequency::Month).await;

        let outcome = fx.billing.completion.complete(payment.id).await.unwrap();
        assert_eq!(
            outcome,
            CompletionOutcome::Completed {
                invoice_number: "2024-03-0001".to_string(),
                extended_accounts: 1,
                invoice_rendered: true,
                notified: true,
            }
        );

        let account = fx.find_account(account.id).await.unwrap();
        assert_eq!(account.expired_at, datetime!(2024-05-01 00:00 UTC));

        let sent = fx.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("2024-03-0001"));
        assert!(sent[0].attachment.is_some());
    }

    #[tokio::test]
    async fn test_pending_payment_untouched() {
        let fx = Fixture::new().await;
        let mut payment = fx.paid_contribution(None, 100).await;
        payment.is_paid = false;
        fx.store.save_payment(&payment).await.unwrap();

        assert_eq!(
            fx.billing.completion.complete(payment.id).await.unwrap(),
            CompletionOutcome::NotPaid
        );
        assert!(fx.payment(payment.id).await.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_payment() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.billing.completion.complete(Uuid::new_v4()).await,
            Err(BillingError::PaymentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_render_failure_keeps_completion() {
        let fx = Fixture::new().await;
        fx.renderer.set_failing(true);
        let account = fx.account("payer@example.org", datetime!(2024-04-01 00:00 UTC)).await;
        let payment = fx.paid_contribution(Some(&account), 700).await;

        let outcome = fx.billing.completion.complete(payment.id).await.unwrap();
        assert!(matches!(
            outcome,
            CompletionOutcome::Completed {
                invoice_rendered: false,
                notified: true,
                ..
            }
        ));
        assert!(fx.payment(payment.id).await.is_completed());

        // the artifact is produced lazily once the renderer is back
        fx.renderer.set_failing(false);
        let completed = fx.payment(payment.id).await;
        assert!(fx.billing.archive.ensure(&completed, Some(&account)).await.unwrap().is_some());
        assert_eq!(fx.renderer.rendered().await, vec![payment.id]);
    }

    #[tokio::test]
    async fn test_mail_failure_keeps_completion() {
        let fx = Fixture::with_mailer(RecordingMailer::failing()).await;
        let account = fx.account("payer@example.org", datetime!(2024-04-01 00:00 UTC)).await;
        let payment = fx.paid_subscription(&account, Frequency::Year).await;

        let summary = fx.billing.completion.complete_pending().await.unwrap();
        assert_eq!(summary.completed, 1);

        let completed = fx.payment(payment.id).await;
        assert_eq!(completed.invoice_number.as_deref(), Some("2024-03-0001"));
        assert_eq!(
            fx.find_account(account.id).await.unwrap().expired_at,
            datetime!(2025-04-01 00:00 UTC)
        );

        // a second sweep does not retry the notification
        fx.billing.completion.complete_pending().await.unwrap();
        assert_eq!(fx.mailer.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_payment_deferred_without_stopping_sweep() {
        let fx = Fixture::new().await;
        let first = fx.paid_contribution(None, 100).await;
        fx.clock.advance(time::Duration::minutes(1));
        let broken = fx.paid_contribution(None, 200).await;
        fx.clock.advance(time::Duration::minutes(1));
        let last = fx.paid_contribution(None, 300).await;
        fx.store.fail_completions(broken.id, 1, false).await;

        let summary = fx.billing.completion.complete_pending().await.unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.deferred, vec![broken.id]);

        let deferred = fx.payment(broken.id).await;
        assert!(deferred.is_paid);
        assert!(deferred.completed_at.is_none());
        assert!(deferred.invoice_number.is_none());
        assert_eq!(fx.payment(first.id).await.invoice_number.as_deref(), Some("2024-03-0001"));
        assert_eq!(fx.payment(last.id).await.invoice_number.as_deref(), Some("2024-03-0002"));

        // picked up again by the next sweep
        let summary = fx.billing.completion.complete_pending().await.unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(fx.payment(broken.id).await.invoice_number.as_deref(), Some("2024-03-0003"));
    }

    #[tokio::test]
    async fn test_transient_conflict_retried() {
        let fx = Fixture::new().await;
        let account = fx.account("payer@example.org", datetime!(2024-04-01 00:00 UTC)).await;
        let payment = fx.paid_subscription(&account, Frequency::Month).await;
        fx.store
            .fail_completions(payment.id, MAX_CONFLICT_RETRIES as u32 - 1, true)
            .await;

        let outcome = fx.billing.completion.complete(payment.id).await.unwrap();
        assert!(matches!(outcome, CompletionOutcome::Completed { .. }));
        assert_eq!(fx.payment(payment.id).await.invoice_number.as_deref(), Some("2024-03-0001"));
        assert_eq!(
            fx.find_account(account.id).await.unwrap().expired_at,
            datetime!(2024-05-01 00:00 UTC)
        );
    }

    #[tokio::test]
    async fn test_persistent_conflict_leaves_payment_paid() {
        let fx = Fixture::new().await;
        let account = fx.account("payer@example.org", datetime!(2024-04-01 00:00 UTC)).await;
        let payment = fx.paid_subscription(&account, Frequency::Month).await;
        fx.store.fail_completions(payment.id, 100, true).await;

        let summary = fx.billing.completion.complete_pending().await.unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.deferred, vec![payment.id]);

        let stored = fx.payment(payment.id).await;
        assert!(stored.completed_at.is_none());
        assert!(stored.invoice_number.is_none());
        assert_eq!(
            fx.find_account(account.id).await.unwrap().expired_at,
            datetime!(2024-04-01 00:00 UTC)
        );
        assert!(fx.mailer.sent().await.is_empty());
    }
}
