//! Seams of the reconciliation engine.
//!
//! The engine has no teloxide or HTTP dependency of its own: sources,
//! notifications, receipts and the ledger are reached through these traits.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::checkbox::models::{CatalogItem, Good, ReceiptArtifact};
use crate::checkbox::{CatalogCache, ReceiptController, SaleError};
use crate::reconcile::transaction::Transaction;

/// A bank or acquirer statement feed.
///
/// Implementations fetch the trailing window of raw records and normalize
/// one record at a time.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Key of the source in the processing-state table, e.g. `"privat24"`
    fn source_type(&self) -> &str;

    fn polling_interval(&self) -> Duration;

    /// File holding the last fetched window.
    fn snapshot_path(&self) -> PathBuf;

    /// Fetches the whole current window.
    async fn fetch(&self) -> anyhow::Result<Vec<Value>>;

    /// Converts a raw record. Errors name the offending field.
    fn normalize(&self, raw: &Value) -> Result<Transaction, String>;
}

/// Delivers messages to supervisors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;

    async fn send_receipt(&self, artifact: &ReceiptArtifact) -> anyhow::Result<()>;
}

/// Creates cashless receipts.
#[async_trait]
pub trait ReceiptIssuer: Send + Sync {
    /// Goods catalog for amount mapping; empty when unavailable.
    async fn catalog(&self) -> Vec<CatalogItem>;

    async fn issue(&self, goods: &[Good]) -> Result<ReceiptArtifact, SaleError>;
}

/// Append-only spreadsheet.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn append_row(&self, worksheet: &str, row: Vec<Value>) -> anyhow::Result<()>;
}

/// Ledger used when no spreadsheet is configured.
pub struct DisabledLedger;

#[async_trait]
impl Ledger for DisabledLedger {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn append_row(&self, worksheet: &str, _row: Vec<Value>) -> anyhow::Result<()> {
        anyhow::bail!("ledger is not configured (worksheet {})", worksheet)
    }
}

/// Issues receipts through the fiscal API.
pub struct CheckboxIssuer {
    receipts: ReceiptController,
    catalog: CatalogCache,
}

impl CheckboxIssuer {
    pub fn new(receipts: ReceiptController, catalog: CatalogCache) -> Self {
        Self { receipts, catalog }
    }
}

#[async_trait]
impl ReceiptIssuer for CheckboxIssuer {
    async fn catalog(&self) -> Vec<CatalogItem> {
        match self.catalog.items().await {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Goods catalog unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn issue(&self, goods: &[Good]) -> Result<ReceiptArtifact, SaleError> {
        self.receipts.sell_and_sign(goods, true).await
    }
}
