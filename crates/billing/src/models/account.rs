//! Payer accounts

use commonpot_shared::{Frequency, PaymentType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Expiration sentinel of free accounts, which never expire
pub const FREE_ACCOUNT_EXPIRATION: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

const MAX_EMAIL_LENGTH: usize = 254;

/// Normalize and validate an email address
pub fn validate_email(email: &str) -> BillingResult<String> {
    let email = email.trim().to_lowercase();

    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return Err(BillingError::Validation(format!(
            "email must be between 1 and {} characters",
            MAX_EMAIL_LENGTH
        )));
    }

    if email.chars().any(char::is_whitespace) {
        return Err(BillingError::Validation(
            "email must not contain whitespace".to_string(),
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| BillingError::Validation(format!("invalid email: {}", email)))?;

    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');

    if local.is_empty() || !domain_ok {
        return Err(BillingError::Validation(format!("invalid email: {}", email)));
    }

    Ok(email)
}

/// Billing address printed on invoices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Set for companies and associations, replaces first/last name
    pub legal_name: Option<String>,
    pub address1: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2
    pub country: Option<String>,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Address {
    /// Return a trimmed copy, or the first missing or malformed field
    pub fn validated(&self) -> BillingResult<Address> {
        let address = Address {
            first_name: clean(&self.first_name),
            last_name: clean(&self.last_name),
            legal_name: clean(&self.legal_name),
            address1: clean(&self.address1),
            postcode: clean(&self.postcode),
            city: clean(&self.city),
            country: clean(&self.country).map(|c| c.to_uppercase()),
        };

        let missing = |field: &str| BillingError::Validation(format!("{} is required", field));

        if address.legal_name.is_none() {
            address.first_name.as_ref().ok_or_else(|| missing("first name"))?;
            address.last_name.as_ref().ok_or_else(|| missing("last name"))?;
        }
        address.address1.as_ref().ok_or_else(|| missing("address"))?;
        address.postcode.as_ref().ok_or_else(|| missing("postcode"))?;
        address.city.as_ref().ok_or_else(|| missing("city"))?;

        let country = address.country.as_ref().ok_or_else(|| missing("country"))?;
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BillingError::Validation(format!(
                "country must be a two-letter code, got {}",
                country
            )));
        }

        Ok(address)
    }

    /// Name to print on invoices
    pub fn display_name(&self) -> Option<String> {
        if let Some(legal_name) = &self.legal_name {
            return Some(legal_name.clone());
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

/// Identity of a payer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub created_at: OffsetDateTime,
    /// `FREE_ACCOUNT_EXPIRATION` means the account never expires
    pub expired_at: OffsetDateTime,
    /// Null or stale means the account is orphaned
    pub last_sync_at: Option<OffsetDateTime>,
    pub preferred_frequency: Frequency,
    pub preferred_payment_type: PaymentType,
    pub preferred_service: String,
    pub reminder: bool,
    pub access_token: Option<String>,
    pub managed_by: Option<Uuid>,
    pub address: Address,
    pub company_vat_number: Option<String>,
}

impl Account {
    pub fn new(
        email: &str,
        created_at: OffsetDateTime,
        expired_at: OffsetDateTime,
    ) -> BillingResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            email: validate_email(email)?,
            created_at,
            expired_at,
            last_sync_at: None,
            preferred_frequency: Frequency::Month,
            preferred_payment_type: PaymentType::Subscription,
            preferred_service: "default".to_string(),
            reminder: false,
            access_token: None,
            managed_by: None,
            address: Address::default(),
            company_vat_number: None,
        })
    }

    pub fn is_free(&self) -> bool {
        self.expired_at == FREE_ACCOUNT_EXPIRATION
    }

    pub fn is_managed(&self) -> bool {
        self.managed_by.is_some()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        !self.is_free() && self.expired_at <= now
    }

    /// Whether the account synchronized at or after `threshold`
    pub fn synced_since(&self, threshold: OffsetDateTime) -> bool {
        self.last_sync_at.is_some_and(|at| at >= threshold)
    }
}
