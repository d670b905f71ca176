//! Test doubles shared by the module tests

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use commonpot_shared::{Clock, FixedClock, Frequency};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::artifact::{InvoiceArchive, InvoiceRenderer};
use crate::email::{BillingEmailService, EmailMessage, Mailer};
use crate::error::{BillingError, BillingResult};
use crate::models::{Account, Payment, FREE_ACCOUNT_EXPIRATION};
use crate::store::{LedgerStore, MemoryLedgerStore};
use crate::{BillingService, BillingSettings};

pub const NOW: OffsetDateTime = time::macros::datetime!(2024-03-10 08:00 UTC);

/// Completed common pot payment carrying `number`
pub fn completed_payment(number: &str) -> Payment {
    let mut payment = Payment::common_pot(500, NOW).unwrap();
    payment.is_paid = true;
    payment.completed_at = Some(NOW);
    payment.invoice_number = Some(number.to_string());
    payment
}

/// Mailer that keeps every message it is asked to send
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    /// Records messages, then reports a transport error
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> BillingResult<()> {
        self.sent.lock().await.push(message.clone());
        if self.fail {
            return Err(BillingError::Email("smtp unavailable".to_string()));
        }
        Ok(())
    }
}

/// Renderer writing a placeholder file and remembering what it rendered
#[derive(Default)]
pub struct RecordingRenderer {
    rendered: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
}

impl RecordingRenderer {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn rendered(&self) -> Vec<Uuid> {
        self.rendered.lock().await.clone()
    }
}

#[async_trait]
impl InvoiceRenderer for RecordingRenderer {
    fn extension(&self) -> &'static str {
        "txt"
    }

    async fn render(
        &self,
        payment: &Payment,
        _account: Option<&Account>,
        path: &Path,
    ) -> BillingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::InvoiceRender("renderer offline".to_string()));
        }
        tokio::fs::write(path, payment.invoice_number.as_deref().unwrap_or_default())
            .await
            .map_err(|e| BillingError::InvoiceRender(e.to_string()))?;
        self.rendered.lock().await.push(payment.id);
        Ok(())
    }
}

/// A fully wired billing service over the in-memory store
pub struct Fixture {
    pub store: Arc<MemoryLedgerStore>,
    pub clock: Arc<FixedClock>,
    pub mailer: Arc<RecordingMailer>,
    pub renderer: Arc<RecordingRenderer>,
    pub billing: BillingService,
    pub default_account_id: Uuid,
    _invoices: tempfile::TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_mailer(RecordingMailer::default()).await
    }

    pub async fn with_mailer(mailer: RecordingMailer) -> Self {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(FixedClock::new(NOW));
        let mailer = Arc::new(mailer);
        let renderer = Arc::new(RecordingRenderer::default());
        let invoices = tempfile::tempdir().unwrap();

        let settings = BillingSettings {
            default_account_id: Uuid::new_v4(),
            default_account_email: "support@example.org".to_string(),
            stale_after: Duration::days(2),
        };
        let default_account_id = settings.default_account_id;

        let billing = BillingService::new(
            store.clone(),
            clock.clone(),
            BillingEmailService::new(mailer.clone(), "https://pay.example.org"),
            InvoiceArchive::new(invoices.path(), renderer.clone()),
            settings,
        );
        billing.bootstrap().await.unwrap();

        Self {
            store,
            clock,
            mailer,
            renderer,
            billing,
            default_account_id,
            _invoices: invoices,
        }
    }

    /// Synced account expiring at `expired_at`
    pub async fn account(&self, email: &str, expired_at: OffsetDateTime) -> Account {
        let mut account = Account::new(email, NOW, expired_at).unwrap();
        account.last_sync_at = Some(self.clock.now());
        self.store.save_account(&account).await.unwrap();
        account
    }

    pub async fn free_account(&self, email: &str) -> Account {
        self.account(email, FREE_ACCOUNT_EXPIRATION).await
    }

    pub async fn save(&self, account: &Account) {
        self.store.save_account(account).await.unwrap();
    }

    /// Paid subscription of `account`, awaiting completion
    pub async fn paid_subscription(&self, account: &Account, frequency: Frequency) -> Payment {
        let mut payment = Payment::subscription(1200, frequency, self.clock.now()).unwrap();
        payment.account_id = Some(account.id);
        payment.is_paid = true;
        self.store.save_payment(&payment).await.unwrap();
        payment
    }

    /// Paid common pot contribution, awaiting completion
    pub async fn paid_contribution(&self, account: Option<&Account>, amount: i64) -> Payment {
        let mut payment = Payment::common_pot(amount, self.clock.now()).unwrap();
        payment.account_id = account.map(|a| a.id);
        payment.is_paid = true;
        self.store.save_payment(&payment).await.unwrap();
        payment
    }

    pub async fn payment(&self, id: Uuid) -> Payment {
        self.store.find_payment(id).await.unwrap().unwrap()
    }

    pub async fn find_account(&self, id: Uuid) -> Option<Account> {
        self.store.find_account(id).await.unwrap()
    }
}
