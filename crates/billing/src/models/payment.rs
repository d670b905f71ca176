//! Payments: subscriptions, common pot contributions and credits

use commonpot_shared::{Frequency, PaymentType};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Lifecycle position of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created at checkout, not paid yet
    Pending,
    /// Paid by the gateway, waiting for the completion sweep
    Paid,
    /// Invoiced and applied to the ledger
    Completed,
}

/// One monetary event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub payment_type: PaymentType,
    /// Minor currency units
    pub amount: i64,
    /// Only set for subscriptions
    pub frequency: Option<Frequency>,
    pub account_id: Option<Uuid>,
    pub is_paid: bool,
    pub completed_at: Option<OffsetDateTime>,
    pub invoice_number: Option<String>,
    /// Payment refunded by a credit
    pub credited_payment_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub username: Option<String>,
    pub company_vat_number: Option<String>,
}

impl Payment {
    fn new(
        payment_type: PaymentType,
        amount: i64,
        created_at: OffsetDateTime,
    ) -> BillingResult<Self> {
        if amount <= 0 {
            return Err(BillingError::Validation(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            created_at,
            payment_type,
            amount,
            frequency: None,
            account_id: None,
            is_paid: false,
            completed_at: None,
            invoice_number: None,
            credited_payment_id: None,
            session_id: None,
            payment_intent_id: None,
            username: None,
            company_vat_number: None,
        })
    }

    pub fn subscription(
        amount: i64,
        frequency: Frequency,
        created_at: OffsetDateTime,
    ) -> BillingResult<Self> {
        let mut payment = Self::new(PaymentType::Subscription, amount, created_at)?;
        payment.frequency = Some(frequency);
        Ok(payment)
    }

    pub fn common_pot(amount: i64, created_at: OffsetDateTime) -> BillingResult<Self> {
        Self::new(PaymentType::CommonPot, amount, created_at)
    }

    /// Build the refund of a completed payment
    pub fn credit_for(original: &Payment, created_at: OffsetDateTime) -> BillingResult<Self> {
        if original.payment_type == PaymentType::Credit {
            return Err(BillingError::PaymentNotCreditable(format!(
                "{} is itself a credit",
                original.id
            )));
        }
        if !original.is_completed() {
            return Err(BillingError::PaymentNotCreditable(format!(
                "{} is not completed",
                original.id
            )));
        }

        let mut credit = Self::new(PaymentType::Credit, original.amount, created_at)?;
        credit.account_id = original.account_id;
        credit.credited_payment_id = Some(original.id);
        credit.username = original.username.clone();
        credit.company_vat_number = original.company_vat_number.clone();
        credit.is_paid = true;
        Ok(credit)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Paid but not yet processed by the ledger
    pub fn awaits_completion(&self) -> bool {
        self.is_paid && self.completed_at.is_none()
    }

    pub fn status(&self) -> PaymentStatus {
        match (self.is_paid, self.completed_at) {
            (_, Some(_)) => PaymentStatus::Completed,
            (true, None) => PaymentStatus::Paid,
            (false, None) => PaymentStatus::Pending,
        }
    }
}
