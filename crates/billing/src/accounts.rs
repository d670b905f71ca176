//! Account management

use std::sync::Arc;

use commonpot_shared::{Clock, Frequency, PaymentType};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{validate_email, Account, Address, FREE_ACCOUNT_EXPIRATION};
use crate::store::LedgerStore;
use crate::subscription;

/// Initial period granted to newly registered accounts, in months
const INITIAL_PERIOD_MONTHS: u32 = 1;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn get(&self, id: Uuid) -> BillingResult<Account> {
        self.store
            .find_account(id)
            .await?
            .ok_or(BillingError::AccountNotFound(id))
    }

    pub async fn find(&self, id: Uuid) -> BillingResult<Option<Account>> {
        self.store.find_account(id).await
    }

    pub async fn find_by_email(&self, email: &str) -> BillingResult<Option<Account>> {
        let email = validate_email(email)?;
        self.store.find_account_by_email(&email).await
    }

    /// Register a new account with its initial period
    pub async fn register(&self, email: &str) -> BillingResult<Account> {
        let email = validate_email(email)?;
        if self.store.find_account_by_email(&email).await?.is_some() {
            return Err(BillingError::EmailTaken(email));
        }

        let now = self.clock.now();
        let expired_at = subscription::add_months(now, INITIAL_PERIOD_MONTHS)?;
        let account = Account::new(&email, now, expired_at)?;
        self.store.save_account(&account).await?;

        tracing::info!(account_id = %account.id, "Registered account");
        Ok(account)
    }

    /// Find an account by email, creating it on first sight
    pub async fn find_or_create(&self, email: &str) -> BillingResult<Account> {
        let email = validate_email(email)?;
        if let Some(account) = self.store.find_account_by_email(&email).await? {
            return Ok(account);
        }

        let now = self.clock.now();
        let account = Account::new(&email, now, now)?;
        self.store.save_account(&account).await?;

        tracing::info!(account_id = %account.id, "Created account lazily from payment sync");
        Ok(account)
    }

    /// Create the reclamation target account if it does not exist
    pub async fn ensure_default_account(&self, id: Uuid, email: &str) -> BillingResult<Account> {
        if let Some(account) = self.store.find_account(id).await? {
            return Ok(account);
        }

        let mut account = Account::new(email, self.clock.now(), FREE_ACCOUNT_EXPIRATION)?;
        account.id = id;
        self.store.save_account(&account).await?;

        tracing::info!(account_id = %id, "Created default account");
        Ok(account)
    }

    pub async fn record_sync(&self, id: Uuid) -> BillingResult<Account> {
        let mut account = self.get(id).await?;
        account.last_sync_at = Some(self.clock.now());
        self.store.save_account(&account).await?;
        Ok(account)
    }

    /// Replace the billing address; nothing is written if validation fails
    pub async fn update_address(
        &self,
        id: Uuid,
        address: &Address,
        company_vat_number: Option<&str>,
    ) -> BillingResult<Account> {
        let address = address.validated()?;
        let company_vat_number = company_vat_number
            .map(|vat| vat.trim().to_uppercase())
            .filter(|vat| !vat.is_empty());

        let mut account = self.get(id).await?;
        account.address = address;
        account.company_vat_number = company_vat_number;
        self.store.save_account(&account).await?;
        Ok(account)
    }

    pub async fn set_reminder(&self, id: Uuid, reminder: bool) -> BillingResult<Account> {
        let mut account = self.get(id).await?;
        account.reminder = reminder;
        self.store.save_account(&account).await?;
        Ok(account)
    }

    pub async fn set_preferences(
        &self,
        id: Uuid,
        frequency: Frequency,
        payment_type: PaymentType,
        service: &str,
    ) -> BillingResult<Account> {
        if payment_type == PaymentType::Credit {
            return Err(BillingError::Validation(
                "credit is not a payment preference".to_string(),
            ));
        }
        let service = service.trim();
        if service.is_empty() {
            return Err(BillingError::Validation("service is required".to_string()));
        }

        let mut account = self.get(id).await?;
        account.preferred_frequency = frequency;
        account.preferred_payment_type = payment_type;
        account.preferred_service = service.to_string();
        self.store.save_account(&account).await?;
        Ok(account)
    }

    /// Put `managed_id` under `manager_id`; management is one level deep
    pub async fn set_manager(&self, managed_id: Uuid, manager_id: Uuid) -> BillingResult<Account> {
        if managed_id == manager_id {
            return Err(BillingError::InvalidManager(
                "an account cannot manage itself".to_string(),
            ));
        }

        let manager = self.get(manager_id).await?;
        if manager.is_managed() {
            return Err(BillingError::InvalidManager(format!(
                "{} is itself managed",
                manager_id
            )));
        }

        let mut managed = self.get(managed_id).await?;
        if !self.store.list_managed_accounts(managed_id).await?.is_empty() {
            return Err(BillingError::InvalidManager(format!(
                "{} already manages other accounts",
                managed_id
            )));
        }

        managed.managed_by = Some(manager_id);
        self.store.save_account(&managed).await?;

        tracing::info!(
            account_id = %managed_id,
            manager_id = %manager_id,
            "Account is now managed"
        );
        Ok(managed)
    }

    pub async fn remove_manager(&self, managed_id: Uuid) -> BillingResult<Account> {
        let mut account = self.get(managed_id).await?;
        account.managed_by = None;
        self.store.save_account(&account).await?;
        Ok(account)
    }

    pub async fn list_managed(&self, manager_id: Uuid) -> BillingResult<Vec<Account>> {
        self.store.list_managed_accounts(manager_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use commonpot_shared::FixedClock;
    use time::macros::datetime;

    fn service() -> AccountService {
        AccountService::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(FixedClock::new(datetime!(2024-01-31 10:00 UTC))),
        )
    }

    #[tokio::test]
    async fn test_register_grants_initial_period() {
        let accounts = service();
        let account = accounts.register("New@Example.org").await.unwrap();

        assert_eq!(account.email, "new@example.org");
        assert_eq!(account.expired_at, datetime!(2024-03-02 10:00 UTC));
        assert!(account.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_and_duplicate() {
        let accounts = service();
        assert!(matches!(
            accounts.register("nope").await,
            Err(BillingError::Validation(_))
        ));

        accounts.register("taken@example.org").await.unwrap();
        assert!(matches!(
            accounts.register(" TAKEN@example.org").await,
            Err(BillingError::EmailTaken(_))
        ));
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let accounts = service();
        let first = accounts.find_or_create("lazy@example.org").await.unwrap();
        let second = accounts.find_or_create("Lazy@example.org").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_default_account_is_free_and_stable() {
        let accounts = service();
        let id = Uuid::new_v4();
        let created = accounts.ensure_default_account(id, "support@example.org").await.unwrap();
        assert_eq!(created.id, id);
        assert!(created.is_free());

        let again = accounts.ensure_default_account(id, "support@example.org").await.unwrap();
        assert_eq!(again, created);
    }

    #[tokio::test]
    async fn test_invalid_address_writes_nothing() {
        let accounts = service();
        let account = accounts.register("addr@example.org").await.unwrap();

        let result = accounts
            .update_address(
                account.id,
                &Address {
                    first_name: Some("Camille".to_string()),
                    ..Default::default()
                },
                Some("fr123"),
            )
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));

        let stored = accounts.find(account.id).await.unwrap().unwrap();
        assert_eq!(stored.address, Address::default());
        assert!(stored.company_vat_number.is_none());
    }

    #[tokio::test]
    async fn test_management_is_single_level() {
        let accounts = service();
        let root = accounts.register("root@example.org").await.unwrap();
        let child = accounts.register("child@example.org").await.unwrap();
        let other = accounts.register("other@example.org").await.unwrap();

        accounts.set_manager(child.id, root.id).await.unwrap();
        assert_eq!(accounts.list_managed(root.id).await.unwrap().len(), 1);

        // child is managed, so it cannot manage
        assert!(matches!(
            accounts.set_manager(other.id, child.id).await,
            Err(BillingError::InvalidManager(_))
        ));
        // root manages child, so it cannot be managed
        assert!(matches!(
            accounts.set_manager(root.id, other.id).await,
            Err(BillingError::InvalidManager(_))
        ));
        assert!(matches!(
            accounts.set_manager(root.id, root.id).await,
            Err(BillingError::InvalidManager(_))
        ));

        accounts.remove_manager(child.id).await.unwrap();
        assert!(accounts.list_managed(root.id).await.unwrap().is_empty());
    }
}
