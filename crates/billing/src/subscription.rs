//! Subscription accounting
//!
//! Expirations move by calendar months. A day that does not exist in the target
//! month rolls over into the following month (Jan 31 + 1 month = Mar 2 or 3,
//! Feb 29 + 1 year = Mar 1).

use std::sync::Arc;

use commonpot_shared::{Clock, Frequency};
use time::{Date, Duration, Month, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::Account;
use crate::store::LedgerStore;

/// Add calendar months, rolling overflowing days into the next month
pub fn add_months(at: OffsetDateTime, months: u32) -> BillingResult<OffsetDateTime> {
    let date = at.date();
    let index = date.year() * 12 + i32::from(u8::from(date.month())) - 1 + months as i32;
    let year = index.div_euclid(12);
    let month = Month::try_from((index.rem_euclid(12) + 1) as u8)?;

    let first = Date::from_calendar_date(year, month, 1)?;
    let rolled = first + Duration::days(i64::from(date.day()) - 1);

    Ok(at.replace_date(rolled))
}

/// New expiration after paying one period
///
/// Free accounts keep their sentinel. Otherwise the period starts from the later
/// of `now` and the current expiration.
pub fn extend_expiration(
    expired_at: OffsetDateTime,
    frequency: Frequency,
    now: OffsetDateTime,
) -> BillingResult<OffsetDateTime> {
    if expired_at == crate::models::FREE_ACCOUNT_EXPIRATION {
        return Ok(expired_at);
    }
    add_months(expired_at.max(now), frequency.months())
}

/// Extend a payer and the accounts it manages
///
/// Each managed account is extended from its own expiration. Only accounts whose
/// expiration actually changed are returned, payer first.
pub fn apply_extension(
    payer: &Account,
    managed: &[Account],
    frequency: Frequency,
    now: OffsetDateTime,
) -> BillingResult<Vec<Account>> {
    let mut extended = Vec::with_capacity(managed.len() + 1);

    for account in std::iter::once(payer).chain(managed.iter()) {
        if account.is_free() {
            continue;
        }
        let mut updated = account.clone();
        updated.expired_at = extend_expiration(account.expired_at, frequency, now)?;
        extended.push(updated);
    }

    Ok(extended)
}

/// Administrative subscription extension, outside the completion workflow
#[derive(Clone)]
pub struct SubscriptionAccounting {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionAccounting {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Extend an account by one period and cascade to its managed accounts
    pub async fn extend(
        &self,
        account_id: Uuid,
        frequency: Frequency,
    ) -> BillingResult<Vec<Account>> {
        let extended = self
            .store
            .extend_subscription(account_id, frequency, self.clock.now())
            .await?;

        tracing::info!(
            account_id = %account_id,
            frequency = %frequency,
            extended = extended.len(),
            "Extended subscription"
        );

        Ok(extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FREE_ACCOUNT_EXPIRATION;
    use time::macros::datetime;

    #[test]
    fn test_add_months_plain() {
        assert_eq!(
            add_months(datetime!(2024-03-15 10:30 UTC), 1).unwrap(),
            datetime!(2024-04-15 10:30 UTC)
        );
        assert_eq!(
            add_months(datetime!(2024-11-15 10:30 UTC), 2).unwrap(),
            datetime!(2025-01-15 10:30 UTC)
        );
    }

    #[test]
    fn test_add_months_rolls_over_short_months() {
        assert_eq!(
            add_months(datetime!(2023-01-31 00:00 UTC), 1).unwrap(),
            datetime!(2023-03-03 00:00 UTC)
        );
        assert_eq!(
            add_months(datetime!(2024-01-31 00:00 UTC), 1).unwrap(),
            datetime!(2024-03-02 00:00 UTC)
        );
    }

    #[test]
    fn test_add_year_from_leap_day() {
        assert_eq!(
            add_months(datetime!(2024-02-29 12:00 UTC), 12).unwrap(),
            datetime!(2025-03-01 12:00 UTC)
        );
        assert_eq!(
            add_months(datetime!(2024-02-29 12:00 UTC), 48).unwrap(),
            datetime!(2028-02-29 12:00 UTC)
        );
    }

    #[test]
    fn test_extend_future_expiration_from_expiration() {
        let now = datetime!(2024-03-01 00:00 UTC);
        let expired_at = datetime!(2024-06-10 00:00 UTC);
        assert_eq!(
            extend_expiration(expired_at, Frequency::Year, now).unwrap(),
            datetime!(2025-06-10 00:00 UTC)
        );
    }

    #[test]
    fn test_extend_past_expiration_from_now() {
        let now = datetime!(2024-03-01 09:00 UTC);
        let expired_at = datetime!(2023-06-10 00:00 UTC);
        assert_eq!(
            extend_expiration(expired_at, Frequency::Year, now).unwrap(),
            datetime!(2025-03-01 09:00 UTC)
        );
        assert_eq!(
            extend_expiration(expired_at, Frequency::Month, now).unwrap(),
            datetime!(2024-04-01 09:00 UTC)
        );
    }

    #[test]
    fn test_extend_free_account_is_noop() {
        let now = datetime!(2024-03-01 09:00 UTC);
        assert_eq!(
            extend_expiration(FREE_ACCOUNT_EXPIRATION, Frequency::Year, now).unwrap(),
            FREE_ACCOUNT_EXPIRATION
        );
    }

    #[test]
    fn test_apply_extension_uses_each_baseline() {
        let now = datetime!(2024-03-01 00:00 UTC);
        let payer =
            Account::new("payer@example.org", now, datetime!(2024-05-01 00:00 UTC)).unwrap();

        let mut lapsed =
            Account::new("lapsed@example.org", now, datetime!(2023-01-01 00:00 UTC)).unwrap();
        lapsed.managed_by = Some(payer.id);
        let mut ahead =
            Account::new("ahead@example.org", now, datetime!(2024-12-24 00:00 UTC)).unwrap();
        ahead.managed_by = Some(payer.id);
        let mut free = Account::new("free@example.org", now, FREE_ACCOUNT_EXPIRATION).unwrap();
        free.managed_by = Some(payer.id);

        let managed = [lapsed.clone(), ahead.clone(), free];
        let extended = apply_extension(&payer, &managed, Frequency::Month, now).unwrap();

        assert_eq!(extended.len(), 3);
        assert_eq!(extended[0].id, payer.id);
        assert_eq!(extended[0].expired_at, datetime!(2024-06-01 00:00 UTC));
        assert_eq!(extended[1].id, lapsed.id);
        assert_eq!(extended[1].expired_at, datetime!(2024-04-01 00:00 UTC));
        assert_eq!(extended[2].id, ahead.id);
        assert_eq!(extended[2].expired_at, datetime!(2025-01-24 00:00 UTC));
    }
}
