//! Expenditures drawn against the common pot

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PotUsage {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub account_id: Uuid,
    /// Minor currency units
    pub amount: i64,
    pub completed_at: Option<OffsetDateTime>,
}

impl PotUsage {
    /// Usages are completed as soon as they are recorded
    pub fn new(account_id: Uuid, amount: i64, now: OffsetDateTime) -> BillingResult<Self> {
        if amount <= 0 {
            return Err(BillingError::Validation(format!(
                "pot usage amount must be positive, got {}",
                amount
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: now,
            account_id,
            amount,
            completed_at: Some(now),
        })
    }
}
