//! Subscription expiry reminders

use std::sync::Arc;

use commonpot_shared::Clock;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::BillingResult;
use crate::models::Token;
use crate::store::LedgerStore;

/// Validity of the login link sent with a reminder
pub const REMINDER_TOKEN_VALIDITY: Duration = Duration::hours(24);

/// Days before expiration at which an "ending" notice goes out
const ENDING_NOTICE_DAYS: [i64; 2] = [7, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    /// Expired one day ago
    Ended,
    Ending { days_remaining: i64 },
}

/// Reminder due for an expiration `days` away (negative in the past)
pub fn classify(days: i64) -> Option<ReminderKind> {
    match days {
        -1 => Some(ReminderKind::Ended),
        d if ENDING_NOTICE_DAYS.contains(&d) => Some(ReminderKind::Ending { days_remaining: d }),
        _ => None,
    }
}

/// Whole days from `now` until `expired_at`
pub fn days_until(expired_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (expired_at - now).whole_days()
}

/// Result of one reminder sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub candidates: usize,
    pub skipped_unsynced: usize,
    pub ended: usize,
    pub ending: usize,
    /// Reminders issued but not delivered by the mailer
    pub undelivered: usize,
    /// Accounts whose token could not be stored
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReminderService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    email: BillingEmailService,
    stale_after: Duration,
}

impl ReminderService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        email: BillingEmailService,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            email,
            stale_after,
        }
    }

    /// Replace the account's login token with a fresh one
    async fn issue_token(&self, account_id: Uuid, now: OffsetDateTime) -> BillingResult<Token> {
        let token = Token::generate(now, REMINDER_TOKEN_VALIDITY)?;
        self.store.save_token(&token).await?;

        let previous = self
            .store
            .replace_access_token(account_id, &token.token)
            .await?;
        if let Some(previous) = previous {
            self.store.delete_token(&previous).await?;
        }
        Ok(token)
    }

    pub async fn send_reminders(&self) -> BillingResult<ReminderSummary> {
        let now = self.clock.now();
        let synced_threshold = now - self.stale_after;
        let candidates = self.store.list_reminder_candidates().await?;

        let mut summary = ReminderSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for account in candidates {
            if account.is_free() {
                continue;
            }
            if !account.synced_since(synced_threshold) {
                summary.skipped_unsynced += 1;
                continue;
            }

            let Some(kind) = classify(days_until(account.expired_at, now)) else {
                continue;
            };

            let token = match self.issue_token(account.id, now).await {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(
                        account_id = %account.id,
                        error = %e,
                        "Failed to issue reminder token"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            let delivered = match kind {
                ReminderKind::Ended => {
                    summary.ended += 1;
                    self.email.send_subscription_ended(&account, &token).await
                }
                ReminderKind::Ending { days_remaining } => {
                    summary.ending += 1;
                    self.email
                        .send_subscription_ending(&account, days_remaining, &token)
                        .await
                }
            };
            if !delivered {
                summary.undelivered += 1;
            }
        }

        tracing::info!(
            candidates = summary.candidates,
            ended = summary.ended,
            ending = summary.ending,
            skipped_unsynced = summary.skipped_unsynced,
            undelivered = summary.undelivered,
            failed = summary.failed,
            "Reminder sweep finished"
        );

        Ok(summary)
    }
}
