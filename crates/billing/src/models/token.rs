//! Short-lived login tokens

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// The credential itself
    pub token: String,
    pub created_at: OffsetDateTime,
    pub expired_at: OffsetDateTime,
}

impl Token {
    /// Generate a fresh 256-bit token valid for `validity`
    pub fn generate(now: OffsetDateTime, validity: Duration) -> BillingResult<Self> {
        if !validity.is_positive() {
            return Err(BillingError::Validation(format!(
                "token validity must be positive, got {}",
                validity
            )));
        }

        let bytes: [u8; 32] = rand::random();

        Ok(Self {
            token: hex::encode(bytes),
            created_at: now,
            expired_at: now + validity,
        })
    }

    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        self.expired_at > now
    }
}
