//! Payment intake
//!
//! Payments enter the ledger either as pending checkouts that the gateway later
//! confirms, or directly as paid rows from a gateway signal. Completion is
//! handled separately by the completion sweep.

use std::sync::Arc;

use commonpot_shared::{Clock, Frequency, PaymentType};
use serde::Deserialize;
use uuid::Uuid;

use crate::accounts::AccountService;
use crate::error::{BillingError, BillingResult};
use crate::models::{Account, Payment};
use crate::store::LedgerStore;

/// Confirmed payment reported by the payment gateway
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySignal {
    pub account_id: Option<Uuid>,
    pub email: Option<String>,
    pub payment_type: PaymentType,
    pub amount: i64,
    /// Required for subscriptions
    pub frequency: Option<Frequency>,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    accounts: AccountService,
}

/// Copy the invoicing identity of the payer onto the payment
fn snapshot_payer(payment: &mut Payment, account: &Account) {
    payment.account_id = Some(account.id);
    payment.username = account.address.display_name();
    payment.company_vat_number = account.company_vat_number.clone();
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        accounts: AccountService,
    ) -> Self {
        Self {
            store,
            clock,
            accounts,
        }
    }

    async fn get_account(&self, id: Uuid) -> BillingResult<Account> {
        self.store
            .find_account(id)
            .await?
            .ok_or(BillingError::AccountNotFound(id))
    }

    async fn get_payment(&self, id: Uuid) -> BillingResult<Payment> {
        self.store
            .find_payment(id)
            .await?
            .ok_or(BillingError::PaymentNotFound(id))
    }

    /// Create a pending subscription checkout
    pub async fn init_subscription(
        &self,
        account_id: Uuid,
        amount: i64,
        frequency: Frequency,
    ) -> BillingResult<Payment> {
        let account = self.get_account(account_id).await?;
        let mut payment = Payment::subscription(amount, frequency, self.clock.now())?;
        snapshot_payer(&mut payment, &account);
        self.store.save_payment(&payment).await?;

        tracing::info!(
            payment_id = %payment.id,
            account_id = %account_id,
            amount,
            frequency = %frequency,
            "Created pending subscription payment"
        );
        Ok(payment)
    }

    /// Create a pending common pot contribution
    pub async fn init_common_pot(&self, account_id: Uuid, amount: i64) -> BillingResult<Payment> {
        let account = self.get_account(account_id).await?;
        let mut payment = Payment::common_pot(amount, self.clock.now())?;
        snapshot_payer(&mut payment, &account);
        self.store.save_payment(&payment).await?;

        tracing::info!(
            payment_id = %payment.id,
            account_id = %account_id,
            amount,
            "Created pending common pot payment"
        );
        Ok(payment)
    }

    /// Persist a confirmed gateway payment
    ///
    /// A signal whose session id is already known marks that payment paid
    /// instead of creating a second row.
    pub async fn record_gateway_signal(&self, signal: GatewaySignal) -> BillingResult<Payment> {
        if let Some(session_id) = &signal.session_id {
            if let Some(mut existing) = self.store.find_payment_by_session(session_id).await? {
                if !existing.is_paid {
                    existing.is_paid = true;
                    if existing.payment_intent_id.is_none() {
                        existing.payment_intent_id = signal.payment_intent_id.clone();
                    }
                    self.store.save_payment(&existing).await?;
                    tracing::info!(
                        payment_id = %existing.id,
                        session_id = %session_id,
                        "Gateway confirmed payment"
                    );
                } else {
                    tracing::debug!(
                        payment_id = %existing.id,
                        session_id = %session_id,
                        "Duplicate gateway signal ignored"
                    );
                }
                return Ok(existing);
            }
        }

        let now = self.clock.now();
        let mut payment = match signal.payment_type {
            PaymentType::Subscription => {
                let frequency = signal.frequency.ok_or_else(|| {
                    BillingError::Validation("subscription payments need a frequency".to_string())
                })?;
                Payment::subscription(signal.amount, frequency, now)?
            }
            PaymentType::CommonPot => Payment::common_pot(signal.amount, now)?,
            PaymentType::Credit => {
                return Err(BillingError::Validation(
                    "credits are issued by the ledger, not the gateway".to_string(),
                ))
            }
        };

        let account = match (signal.account_id, signal.email.as_deref()) {
            (Some(id), _) => Some(self.get_account(id).await?),
            (None, Some(email)) => Some(self.accounts.find_or_create(email).await?),
            (None, None) => None,
        };
        match &account {
            Some(account) => snapshot_payer(&mut payment, account),
            None if payment.payment_type == PaymentType::Subscription => {
                return Err(BillingError::Validation(
                    "subscription payments need an account".to_string(),
                ))
            }
            None => {}
        }

        payment.is_paid = true;
        payment.session_id = signal.session_id;
        payment.payment_intent_id = signal.payment_intent_id;
        self.store.save_payment(&payment).await?;

        tracing::info!(
            payment_id = %payment.id,
            payment_type = %payment.payment_type,
            amount = payment.amount,
            "Recorded gateway payment"
        );
        Ok(payment)
    }

    /// Move a pending payment to paid
    pub async fn mark_paid(&self, payment_id: Uuid) -> BillingResult<Payment> {
        let mut payment = self.get_payment(payment_id).await?;
        if payment.is_paid {
            return Ok(payment);
        }
        payment.is_paid = true;
        self.store.save_payment(&payment).await?;
        Ok(payment)
    }

    /// Refund a completed payment with a credit
    ///
    /// The credit is created paid and gets its own invoice number from the next
    /// completion sweep.
    pub async fn credit(&self, payment_id: Uuid) -> BillingResult<Payment> {
        let original = self.get_payment(payment_id).await?;

        let already_credited = self
            .store
            .list_payments_by_type(PaymentType::Credit)
            .await?
            .iter()
            .any(|credit| credit.credited_payment_id == Some(payment_id));
        if already_credited {
            return Err(BillingError::PaymentNotCreditable(format!(
                "{} is already credited",
                payment_id
            )));
        }

        let credit = Payment::credit_for(&original, self.clock.now())?;
        self.store.save_payment(&credit).await?;

        tracing::info!(
            credit_id = %credit.id,
            payment_id = %payment_id,
            amount = credit.amount,
            "Issued credit"
        );
        Ok(credit)
    }

    pub async fn find(&self, payment_id: Uuid) -> BillingResult<Option<Payment>> {
        self.store.find_payment(payment_id).await
    }

    pub async fn list_for_account(&self, account_id: Uuid) -> BillingResult<Vec<Payment>> {
        self.store.list_payments_by_account(account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;
    use crate::store::MemoryLedgerStore;
    use commonpot_shared::FixedClock;
    use time::macros::datetime;

    struct Harness {
        store: Arc<MemoryLedgerStore>,
        accounts: AccountService,
        payments: PaymentService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(FixedClock::new(datetime!(2024-03-10 08:00 UTC)));
        let accounts = AccountService::new(store.clone(), clock.clone());
        let payments = PaymentService::new(store.clone(), clock, accounts.clone());
        Harness {
            store,
            accounts,
            payments,
        }
    }

    fn signal(payment_type: PaymentType, amount: i64) -> GatewaySignal {
        GatewaySignal {
            account_id: None,
            email: None,
            payment_type,
            amount,
            frequency: None,
            session_id: None,
            payment_intent_id: None,
        }
    }

    #[tokio::test]
    async fn test_init_subscription_snapshots_payer() {
        let h = harness();
        let account = h.accounts.register("payer@example.org").await.unwrap();
        h.accounts
            .update_address(
                account.id,
                &Address {
                    legal_name: Some("Atelier Libre".to_string()),
                    address1: Some("1 rue des Lilas".to_string()),
                    postcode: Some("75011".to_string()),
                    city: Some("Paris".to_string()),
                    country: Some("fr".to_string()),
                    ..Default::default()
                },
                Some(" fr12345 "),
            )
            .await
            .unwrap();

        let payment = h
            .payments
            .init_subscription(account.id, 1200, Frequency::Year)
            .await
            .unwrap();

        assert!(!payment.is_paid);
        assert_eq!(payment.frequency, Some(Frequency::Year));
        assert_eq!(payment.username.as_deref(), Some("Atelier Libre"));
        assert_eq!(payment.company_vat_number.as_deref(), Some("FR12345"));
    }

    #[tokio::test]
    async fn test_init_rejects_non_positive_amount() {
        let h = harness();
        let account = h.accounts.register("payer@example.org").await.unwrap();
        assert!(matches!(
            h.payments.init_common_pot(account.id, 0).await,
            Err(BillingError::Validation(_))
        ));
        assert!(h.store.list_payments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_signal_creates_account_by_email() {
        let h = harness();
        let mut sig = signal(PaymentType::Subscription, 500);
        sig.email = Some("Fresh@Example.org".to_string());
        sig.frequency = Some(Frequency::Month);
        sig.session_id = Some("cs_1".to_string());

        let payment = h.payments.record_gateway_signal(sig.clone()).await.unwrap();
        assert!(payment.is_paid);
        assert!(payment.awaits_completion());

        let account = h.accounts.find_by_email("fresh@example.org").await.unwrap().unwrap();
        assert_eq!(payment.account_id, Some(account.id));

        // re-delivery does not duplicate
        let again = h.payments.record_gateway_signal(sig).await.unwrap();
        assert_eq!(again.id, payment.id);
        assert_eq!(h.store.list_payments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_signal_confirms_pending_checkout() {
        let h = harness();
        let account = h.accounts.register("payer@example.org").await.unwrap();
        let mut pending = h.payments.init_common_pot(account.id, 300).await.unwrap();
        pending.session_id = Some("cs_42".to_string());
        h.store.save_payment(&pending).await.unwrap();

        let mut sig = signal(PaymentType::CommonPot, 300);
        sig.session_id = Some("cs_42".to_string());
        sig.payment_intent_id = Some("pi_42".to_string());

        let confirmed = h.payments.record_gateway_signal(sig).await.unwrap();
        assert_eq!(confirmed.id, pending.id);
        assert!(confirmed.is_paid);
        assert_eq!(confirmed.payment_intent_id.as_deref(), Some("pi_42"));
    }

    #[tokio::test]
    async fn test_gateway_signal_validation() {
        let h = harness();

        // subscription without account
        let mut sig = signal(PaymentType::Subscription, 500);
        sig.frequency = Some(Frequency::Month);
        assert!(matches!(
            h.payments.record_gateway_signal(sig).await,
            Err(BillingError::Validation(_))
        ));

        assert!(matches!(
            h.payments.record_gateway_signal(signal(PaymentType::Credit, 500)).await,
            Err(BillingError::Validation(_))
        ));

        // anonymous donation is fine
        let donation = h
            .payments
            .record_gateway_signal(signal(PaymentType::CommonPot, 500))
            .await
            .unwrap();
        assert!(donation.account_id.is_none());
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let h = harness();
        let account = h.accounts.register("payer@example.org").await.unwrap();
        let pending = h.payments.init_common_pot(account.id, 300).await.unwrap();

        let paid = h.payments.mark_paid(pending.id).await.unwrap();
        assert!(paid.is_paid);
        assert_eq!(h.payments.mark_paid(pending.id).await.unwrap(), paid);
    }

    #[tokio::test]
    async fn test_credit_rules() {
        let h = harness();
        let account = h.accounts.register("payer@example.org").await.unwrap();
        let mut payment = h.payments.init_common_pot(account.id, 300).await.unwrap();

        // not completed yet
        assert!(matches!(
            h.payments.credit(payment.id).await,
            Err(BillingError::PaymentNotCreditable(_))
        ));

        payment.is_paid = true;
        payment.completed_at = Some(datetime!(2024-03-10 09:00 UTC));
        payment.invoice_number = Some("2024-03-0001".to_string());
        h.store.save_payment(&payment).await.unwrap();

        let credit = h.payments.credit(payment.id).await.unwrap();
        assert_eq!(credit.payment_type, PaymentType::Credit);
        assert_eq!(credit.amount, 300);
        assert_eq!(credit.account_id, Some(account.id));
        assert!(credit.awaits_completion());

        assert!(matches!(
            h.payments.credit(payment.id).await,
            Err(BillingError::PaymentNotCreditable(_))
        ));
        assert_eq!(h.payments.list_for_account(account.id).await.unwrap().len(), 2);
    }
}
