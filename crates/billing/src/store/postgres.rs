//! Postgres ledger store
//!
//! Completion runs in one transaction holding a transaction-scoped advisory
//! lock, so invoice numbers are allocated by a single writer at a time. The
//! `UNIQUE(invoice_number)` constraint backs this up: a collision surfaces as
//! `BillingError::InvoiceNumberConflict` and rolls the whole completion back.

use async_trait::async_trait;
use commonpot_shared::{Frequency, PaymentType};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CompletedPayment, LedgerStore, Reassignment};
use crate::error::{BillingError, BillingResult};
use crate::invoice::{self, YearMonth};
use crate::models::{Account, Address, Payment, PotUsage, Token};
use crate::subscription;

/// Advisory lock key serializing invoice-number allocation
const INVOICE_LOCK_KEY: i64 = 0x636f_6d6d_6f6e_706f;

const ACCOUNT_COLUMNS: &str = r#"
    id, email, created_at, expired_at, last_sync_at,
    preferred_frequency, preferred_payment_type, preferred_service,
    reminder, access_token, managed_by,
    address_first_name, address_last_name, address_legal_name,
    address_address1, address_postcode, address_city, address_country,
    company_vat_number
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, created_at, payment_type, amount, frequency, account_id,
    is_paid, completed_at, invoice_number, credited_payment_id,
    session_id, payment_intent_id, username, company_vat_number
"#;

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    created_at: OffsetDateTime,
    expired_at: OffsetDateTime,
    last_sync_at: Option<OffsetDateTime>,
    preferred_frequency: String,
    preferred_payment_type: String,
    preferred_service: String,
    reminder: bool,
    access_token: Option<String>,
    managed_by: Option<Uuid>,
    address_first_name: Option<String>,
    address_last_name: Option<String>,
    address_legal_name: Option<String>,
    address_address1: Option<String>,
    address_postcode: Option<String>,
    address_city: Option<String>,
    address_country: Option<String>,
    company_vat_number: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = BillingError;

    fn try_from(row: AccountRow) -> BillingResult<Self> {
        Ok(Account {
            id: row.id,
            email: row.email,
            created_at: row.created_at,
            expired_at: row.expired_at,
            last_sync_at: row.last_sync_at,
            preferred_frequency: row.preferred_frequency.parse::<Frequency>()?,
            preferred_payment_type: row.preferred_payment_type.parse::<PaymentType>()?,
            preferred_service: row.preferred_service,
            reminder: row.reminder,
            access_token: row.access_token,
            managed_by: row.managed_by,
            address: Address {
                first_name: row.address_first_name,
                last_name: row.address_last_name,
                legal_name: row.address_legal_name,
                address1: row.address_address1,
                postcode: row.address_postcode,
                city: row.address_city,
                country: row.address_country,
            },
            company_vat_number: row.company_vat_number,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    created_at: OffsetDateTime,
    payment_type: String,
    amount: i64,
    frequency: Option<String>,
    account_id: Option<Uuid>,
    is_paid: bool,
    completed_at: Option<OffsetDateTime>,
    invoice_number: Option<String>,
    credited_payment_id: Option<Uuid>,
    session_id: Option<String>,
    payment_intent_id: Option<String>,
    username: Option<String>,
    company_vat_number: Option<String>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> BillingResult<Self> {
        Ok(Payment {
            id: row.id,
            created_at: row.created_at,
            payment_type: row.payment_type.parse::<PaymentType>()?,
            amount: row.amount,
            frequency: row
                .frequency
                .as_deref()
                .map(str::parse::<Frequency>)
                .transpose()?,
            account_id: row.account_id,
            is_paid: row.is_paid,
            completed_at: row.completed_at,
            invoice_number: row.invoice_number,
            credited_payment_id: row.credited_payment_id,
            session_id: row.session_id,
            payment_intent_id: row.payment_intent_id,
            username: row.username,
            company_vat_number: row.company_vat_number,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PotUsageRow {
    id: Uuid,
    created_at: OffsetDateTime,
    account_id: Uuid,
    amount: i64,
    completed_at: Option<OffsetDateTime>,
}

impl From<PotUsageRow> for PotUsage {
    fn from(row: PotUsageRow) -> Self {
        PotUsage {
            id: row.id,
            created_at: row.created_at,
            account_id: row.account_id,
            amount: row.amount,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    token: String,
    created_at: OffsetDateTime,
    expired_at: OffsetDateTime,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Token {
            token: row.token,
            created_at: row.created_at,
            expired_at: row.expired_at,
        }
    }
}

fn accounts_from(rows: Vec<AccountRow>) -> BillingResult<Vec<Account>> {
    rows.into_iter().map(Account::try_from).collect()
}

fn payments_from(rows: Vec<PaymentRow>) -> BillingResult<Vec<Payment>> {
    rows.into_iter().map(Payment::try_from).collect()
}

fn is_unique_violation(e: &sqlx::Error, constraint: &str) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Ledger backed by the Postgres schema in `commonpot-shared/migrations`
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_accounts(&self, filter: &str) -> BillingResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts {} ORDER BY created_at, id",
            ACCOUNT_COLUMNS, filter
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        accounts_from(rows)
    }

    async fn fetch_payments(&self, filter: &str) -> BillingResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments {} ORDER BY created_at, id",
            PAYMENT_COLUMNS, filter
        );
        let rows: Vec<PaymentRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        payments_from(rows)
    }

    /// Accounts managed by `manager_id`, locked until the transaction ends
    async fn lock_managed(
        tx: &mut Transaction<'_, Postgres>,
        manager_id: Uuid,
    ) -> BillingResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE managed_by = $1 ORDER BY created_at, id FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(manager_id)
            .fetch_all(&mut **tx)
            .await?;
        accounts_from(rows)
    }

    async fn update_expiration(
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE accounts SET expired_at = $2 WHERE id = $1")
            .bind(account.id)
            .bind(account.expired_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_account(&self, id: Uuid) -> BillingResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> BillingResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE email = $1", ACCOUNT_COLUMNS);
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(&self) -> BillingResult<Vec<Account>> {
        self.fetch_accounts("").await
    }

    async fn list_managed_accounts(&self, manager_id: Uuid) -> BillingResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE managed_by = $1 ORDER BY created_at, id",
            ACCOUNT_COLUMNS
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(manager_id)
            .fetch_all(&self.pool)
            .await?;
        accounts_from(rows)
    }

    async fn list_reminder_candidates(&self) -> BillingResult<Vec<Account>> {
        self.fetch_accounts("WHERE reminder = TRUE AND expired_at <> 'epoch'::timestamptz")
            .await
    }

    async fn list_stale_account_ids(
        &self,
        synced_before: OffsetDateTime,
    ) -> BillingResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM accounts
            WHERE managed_by IS NULL
              AND (last_sync_at IS NULL OR last_sync_at < $1)
            ORDER BY created_at, id
            "#,
        )
        .bind(synced_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn save_account(&self, account: &Account) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (
                id, email, created_at, expired_at, last_sync_at,
                preferred_frequency, preferred_payment_type, preferred_service,
                reminder, access_token, managed_by,
                address_first_name, address_last_name, address_legal_name,
                address_address1, address_postcode, address_city, address_country,
                company_vat_number
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                expired_at = EXCLUDED.expired_at,
                last_sync_at = EXCLUDED.last_sync_at,
                preferred_frequency = EXCLUDED.preferred_frequency,
                preferred_payment_type = EXCLUDED.preferred_payment_type,
                preferred_service = EXCLUDED.preferred_service,
                reminder = EXCLUDED.reminder,
                access_token = EXCLUDED.access_token,
                managed_by = EXCLUDED.managed_by,
                address_first_name = EXCLUDED.address_first_name,
                address_last_name = EXCLUDED.address_last_name,
                address_legal_name = EXCLUDED.address_legal_name,
                address_address1 = EXCLUDED.address_address1,
                address_postcode = EXCLUDED.address_postcode,
                address_city = EXCLUDED.address_city,
                address_country = EXCLUDED.address_country,
                company_vat_number = EXCLUDED.company_vat_number
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(account.created_at)
        .bind(account.expired_at)
        .bind(account.last_sync_at)
        .bind(account.preferred_frequency.as_str())
        .bind(account.preferred_payment_type.as_str())
        .bind(&account.preferred_service)
        .bind(account.reminder)
        .bind(&account.access_token)
        .bind(account.managed_by)
        .bind(&account.address.first_name)
        .bind(&account.address.last_name)
        .bind(&account.address.legal_name)
        .bind(&account.address.address1)
        .bind(&account.address.postcode)
        .bind(&account.address.city)
        .bind(&account.address.country)
        .bind(&account.company_vat_number)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e, "accounts_email_key") => {
                Err(BillingError::EmailTaken(account.email.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_access_token(
        &self,
        account_id: Uuid,
        token: &str,
    ) -> BillingResult<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<Option<String>> =
            sqlx::query_scalar("SELECT access_token FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Err(BillingError::AccountNotFound(account_id));
        };

        sqlx::query("UPDATE accounts SET access_token = $2 WHERE id = $1")
            .bind(account_id)
            .bind(token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(previous)
    }

    async fn extend_subscription(
        &self,
        account_id: Uuid,
        frequency: Frequency,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Account>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let payer: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?;
        let payer = match payer {
            Some(row) => Account::try_from(row)?,
            None => return Err(BillingError::AccountNotFound(account_id)),
        };

        let managed = Self::lock_managed(&mut tx, account_id).await?;
        let extended = subscription::apply_extension(&payer, &managed, frequency, now)?;
        for account in &extended {
            Self::update_expiration(&mut tx, account).await?;
        }

        tx.commit().await?;
        Ok(extended)
    }

    async fn delete_accounts(&self, ids: &[Uuid]) -> BillingResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM accounts WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_payment_by_session(&self, session_id: &str) -> BillingResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE session_id = $1", PAYMENT_COLUMNS);
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_payments(&self) -> BillingResult<Vec<Payment>> {
        self.fetch_payments("").await
    }

    async fn list_payments_by_account(&self, account_id: Uuid) -> BillingResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE account_id = $1 ORDER BY created_at, id",
            PAYMENT_COLUMNS
        );
        let rows: Vec<PaymentRow> = sqlx::query_as(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        payments_from(rows)
    }

    async fn list_payments_by_type(
        &self,
        payment_type: PaymentType,
    ) -> BillingResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE payment_type = $1 ORDER BY created_at, id",
            PAYMENT_COLUMNS
        );
        let rows: Vec<PaymentRow> = sqlx::query_as(&sql)
            .bind(payment_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        payments_from(rows)
    }

    async fn list_payments_to_complete(&self) -> BillingResult<Vec<Payment>> {
        self.fetch_payments("WHERE is_paid = TRUE AND completed_at IS NULL")
            .await
    }

    async fn save_payment(&self, payment: &Payment) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                id, created_at, payment_type, amount, frequency, account_id,
                is_paid, completed_at, invoice_number, credited_payment_id,
                session_id, payment_intent_id, username, company_vat_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                amount = EXCLUDED.amount,
                frequency = EXCLUDED.frequency,
                account_id = EXCLUDED.account_id,
                is_paid = EXCLUDED.is_paid,
                completed_at = EXCLUDED.completed_at,
                invoice_number = EXCLUDED.invoice_number,
                credited_payment_id = EXCLUDED.credited_payment_id,
                session_id = EXCLUDED.session_id,
                payment_intent_id = EXCLUDED.payment_intent_id,
                username = EXCLUDED.username,
                company_vat_number = EXCLUDED.company_vat_number
            "#,
        )
        .bind(payment.id)
        .bind(payment.created_at)
        .bind(payment.payment_type.as_str())
        .bind(payment.amount)
        .bind(payment.frequency.map(|f| f.as_str()))
        .bind(payment.account_id)
        .bind(payment.is_paid)
        .bind(payment.completed_at)
        .bind(&payment.invoice_number)
        .bind(payment.credited_payment_id)
        .bind(&payment.session_id)
        .bind(&payment.payment_intent_id)
        .bind(&payment.username)
        .bind(&payment.company_vat_number)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e, "payments_invoice_number_key") => {
                Err(BillingError::InvoiceNumberConflict(
                    payment.invoice_number.clone().unwrap_or_default(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn last_invoice_number(&self) -> BillingResult<Option<String>> {
        let last: Option<String> =
            sqlx::query_scalar(r#"SELECT MAX(invoice_number COLLATE "C") FROM payments"#)
                .fetch_one(&self.pool)
                .await?;
        Ok(last)
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        completed_at: OffsetDateTime,
    ) -> BillingResult<Option<CompletedPayment>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(INVOICE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut payment = match row {
            Some(row) => Payment::try_from(row)?,
            None => return Err(BillingError::PaymentNotFound(payment_id)),
        };
        if !payment.awaits_completion() {
            // Dropping the transaction rolls it back
            return Ok(None);
        }

        let last: Option<String> =
            sqlx::query_scalar(r#"SELECT MAX(invoice_number COLLATE "C") FROM payments"#)
                .fetch_one(&mut *tx)
                .await?;
        let number = invoice::allocate(last.as_deref(), YearMonth::from(completed_at))?;

        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET completed_at = $2,
                invoice_number = $3
            WHERE id = $1
              AND completed_at IS NULL
            "#,
        )
        .bind(payment_id)
        .bind(completed_at)
        .bind(&number)
        .execute(&mut *tx)
        .await;

        match updated {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e, "payments_invoice_number_key") => {
                tracing::warn!(
                    payment_id = %payment_id,
                    invoice_number = %number,
                    "Invoice number collision, rolling back completion"
                );
                return Err(BillingError::InvoiceNumberConflict(number));
            }
            Err(e) => return Err(e.into()),
        }

        payment.completed_at = Some(completed_at);
        payment.invoice_number = Some(number);

        let mut extended_accounts = Vec::new();
        if let (PaymentType::Subscription, Some(account_id), Some(frequency)) =
            (payment.payment_type, payment.account_id, payment.frequency)
        {
            let sql = format!("SELECT {} FROM accounts WHERE id = $1 FOR UPDATE", ACCOUNT_COLUMNS);
            let payer: Option<AccountRow> = sqlx::query_as(&sql)
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(payer) = payer {
                let payer = Account::try_from(payer)?;
                let managed = Self::lock_managed(&mut tx, account_id).await?;

                extended_accounts =
                    subscription::apply_extension(&payer, &managed, frequency, completed_at)?;
                for account in &extended_accounts {
                    Self::update_expiration(&mut tx, account).await?;
                }
            }
        }

        tx.commit().await?;

        Ok(Some(CompletedPayment {
            payment,
            extended_accounts,
        }))
    }

    async fn save_pot_usage(&self, usage: &PotUsage) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pot_usages (id, created_at, account_id, amount, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                account_id = EXCLUDED.account_id,
                amount = EXCLUDED.amount,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(usage.id)
        .bind(usage.created_at)
        .bind(usage.account_id)
        .bind(usage.amount)
        .bind(usage.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_pot_usages(&self) -> BillingResult<Vec<PotUsage>> {
        let rows: Vec<PotUsageRow> = sqlx::query_as(
            r#"
            SELECT id, created_at, account_id, amount, completed_at
            FROM pot_usages
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PotUsage::from).collect())
    }

    async fn reassign_financial_records(
        &self,
        from: &[Uuid],
        to: Uuid,
    ) -> BillingResult<Reassignment> {
        if from.is_empty() {
            return Ok(Reassignment::default());
        }

        let mut tx = self.pool.begin().await?;

        let payments = sqlx::query("UPDATE payments SET account_id = $2 WHERE account_id = ANY($1)")
            .bind(from)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        let pot_usages =
            sqlx::query("UPDATE pot_usages SET account_id = $2 WHERE account_id = ANY($1)")
                .bind(from)
                .bind(to)
                .execute(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(Reassignment {
            payments: payments.rows_affected(),
            pot_usages: pot_usages.rows_affected(),
        })
    }

    async fn save_token(&self, token: &Token) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token, created_at, expired_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token) DO UPDATE SET expired_at = EXCLUDED.expired_at
            "#,
        )
        .bind(&token.token)
        .bind(token.created_at)
        .bind(token.expired_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_token(&self, value: &str) -> BillingResult<Option<Token>> {
        let row: Option<TokenRow> =
            sqlx::query_as("SELECT token, created_at, expired_at FROM tokens WHERE token = $1")
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Token::from))
    }

    async fn delete_token(&self, value: &str) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE token = $1")
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> BillingResult<u64> {
        // accounts.access_token is cleared by ON DELETE SET NULL
        let result = sqlx::query("DELETE FROM tokens WHERE expired_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
