//! Billing error types

use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    /// Another completion claimed the same invoice number first
    #[error("Invoice number conflict: {0}")]
    InvoiceNumberConflict(String),

    #[error("Invalid invoice number: {0}")]
    InvalidInvoiceNumber(String),

    #[error("Invoice sequence exhausted for {0}")]
    InvoiceSequenceExhausted(String),

    #[error("Payment cannot be credited: {0}")]
    PaymentNotCreditable(String),

    #[error("Invalid account manager: {0}")]
    InvalidManager(String),

    /// Stale account records could not be moved to the default account
    #[error("Reassignment failed: {0}")]
    ReassignmentFailed(String),

    #[error("Default account {0} does not exist")]
    MissingDefaultAccount(Uuid),

    #[error("Calendar arithmetic failed: {0}")]
    Calendar(#[from] time::error::ComponentRange),

    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Invoice rendering failed: {0}")]
    InvoiceRender(String),
}

impl BillingError {
    /// Errors that only affect the current attempt and may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::InvoiceNumberConflict(_))
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<commonpot_shared::UnknownVariant> for BillingError {
    fn from(e: commonpot_shared::UnknownVariant) -> Self {
        BillingError::CorruptRow(e.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        BillingError::Email(e.to_string())
    }
}
