//! Invoice artifacts
//!
//! Each completed payment has one artifact at `<dir>/<payment id>.<ext>`. The
//! renderer is only invoked when the file is missing, so a failed render is
//! simply retried the next time the artifact is requested.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use commonpot_shared::{Frequency, PaymentType};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Account, Address, Payment};

#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    /// File extension of produced artifacts
    fn extension(&self) -> &'static str;

    async fn render(
        &self,
        payment: &Payment,
        account: Option<&Account>,
        path: &Path,
    ) -> BillingResult<()>;
}

#[derive(Debug, Serialize)]
struct InvoiceCustomer<'a> {
    email: &'a str,
    name: Option<String>,
    address: &'a Address,
}

#[derive(Debug, Serialize)]
struct InvoiceDocument<'a> {
    invoice_number: &'a str,
    issued_at: OffsetDateTime,
    payment_id: Uuid,
    payment_type: PaymentType,
    frequency: Option<Frequency>,
    amount: i64,
    credited_payment_id: Option<Uuid>,
    username: Option<&'a str>,
    company_vat_number: Option<&'a str>,
    customer: Option<InvoiceCustomer<'a>>,
}

/// Writes invoices as JSON documents
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonInvoiceRenderer;

#[async_trait]
impl InvoiceRenderer for JsonInvoiceRenderer {
    fn extension(&self) -> &'static str {
        "json"
    }

    async fn render(
        &self,
        payment: &Payment,
        account: Option<&Account>,
        path: &Path,
    ) -> BillingResult<()> {
        let (invoice_number, issued_at) = match (&payment.invoice_number, payment.completed_at) {
            (Some(number), Some(at)) => (number.as_str(), at),
            _ => {
                return Err(BillingError::InvoiceRender(format!(
                    "payment {} is not completed",
                    payment.id
                )))
            }
        };

        let document = InvoiceDocument {
            invoice_number,
            issued_at,
            payment_id: payment.id,
            payment_type: payment.payment_type,
            frequency: payment.frequency,
            amount: payment.amount,
            credited_payment_id: payment.credited_payment_id,
            username: payment.username.as_deref(),
            company_vat_number: payment.company_vat_number.as_deref(),
            customer: account.map(|account| InvoiceCustomer {
                email: &account.email,
                name: account.address.display_name(),
                address: &account.address,
            }),
        };

        let body = serde_json::to_vec_pretty(&document)
            .map_err(|e| BillingError::InvoiceRender(e.to_string()))?;

        // Write then rename so a crash never leaves a truncated artifact behind
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, body)
            .await
            .map_err(|e| BillingError::InvoiceRender(format!("{}: {}", partial.display(), e)))?;
        tokio::fs::rename(&partial, path)
            .await
            .map_err(|e| BillingError::InvoiceRender(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }
}

/// Directory of rendered invoices
#[derive(Clone)]
pub struct InvoiceArchive {
    dir: PathBuf,
    renderer: Arc<dyn InvoiceRenderer>,
}

impl InvoiceArchive {
    pub fn new(dir: impl Into<PathBuf>, renderer: Arc<dyn InvoiceRenderer>) -> Self {
        Self {
            dir: dir.into(),
            renderer,
        }
    }

    /// Artifact path, resolvable once the payment has an invoice number
    pub fn path_for(&self, payment: &Payment) -> Option<PathBuf> {
        payment.invoice_number.as_ref()?;
        Some(
            self.dir
                .join(format!("{}.{}", payment.id, self.renderer.extension())),
        )
    }

    /// Render the artifact if it does not exist yet
    pub async fn ensure(
        &self,
        payment: &Payment,
        account: Option<&Account>,
    ) -> BillingResult<Option<PathBuf>> {
        let Some(path) = self.path_for(payment) else {
            return Ok(None);
        };

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BillingError::InvoiceRender(format!("{}: {}", path.display(), e)))?;
        if exists {
            return Ok(Some(path));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BillingError::InvoiceRender(format!("{}: {}", self.dir.display(), e)))?;
        self.renderer.render(payment, account, &path).await?;

        tracing::info!(
            payment_id = %payment.id,
            path = %path.display(),
            "Rendered invoice artifact"
        );

        Ok(Some(path))
    }
}
