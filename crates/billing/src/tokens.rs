//! Login tokens

use std::sync::Arc;

use commonpot_shared::Clock;
use time::Duration;

use crate::error::BillingResult;
use crate::models::Token;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn issue(&self, validity: Duration) -> BillingResult<Token> {
        let token = Token::generate(self.clock.now(), validity)?;
        self.store.save_token(&token).await?;
        Ok(token)
    }

    /// The token, if it exists and has not expired
    pub async fn find_valid(&self, value: &str) -> BillingResult<Option<Token>> {
        let now = self.clock.now();
        Ok(self
            .store
            .find_token(value)
            .await?
            .filter(|token| token.is_valid(now)))
    }

    pub async fn revoke(&self, value: &str) -> BillingResult<bool> {
        self.store.delete_token(value).await
    }

    pub async fn purge_expired(&self) -> BillingResult<u64> {
        let purged = self.store.delete_expired_tokens(self.clock.now()).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired login tokens");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use commonpot_shared::FixedClock;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_token_valid_until_expiry() {
        let clock = Arc::new(FixedClock::new(datetime!(2024-03-10 08:00 UTC)));
        let tokens = TokenService::new(Arc::new(MemoryLedgerStore::new()), clock.clone());

        let token = tokens.issue(Duration::hours(24)).await.unwrap();
        assert_eq!(token.token.len(), 64);
        assert!(tokens.find_valid(&token.token).await.unwrap().is_some());

        clock.advance(Duration::hours(24));
        assert!(tokens.find_valid(&token.token).await.unwrap().is_none());

        assert_eq!(tokens.purge_expired().await.unwrap(), 1);
        assert!(!tokens.revoke(&token.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let tokens = TokenService::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(FixedClock::new(datetime!(2024-03-10 08:00 UTC))),
        );
        assert!(tokens.find_valid("deadbeef").await.unwrap().is_none());
        assert!(tokens.issue(Duration::ZERO).await.is_err());
    }
}
