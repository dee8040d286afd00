//! Cashless transaction reconciliation.
//!
//! Architecture: each payment source implements `TransactionSource`; one
//! `ReconcileEngine` per source polls it and drives notifications, receipts
//! and ledger rows through the `Notifier`, `ReceiptIssuer` and `Ledger`
//! traits. The engine itself has no teloxide dependency.

pub mod engine;
pub mod fondy;
pub mod goods;
pub mod privat24;
pub mod snapshot;
pub mod traits;
pub mod transaction;

pub use engine::{CycleReport, ReconcileEngine};
pub use traits::{CheckboxIssuer, DisabledLedger, Ledger, Notifier, ReceiptIssuer, TransactionSource};
pub use transaction::Transaction;

use std::path::Path;
use std::sync::Arc;

use crate::core::config::Settings;

/// Supported statement feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Privat24,
    Fondy,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Privat24, SourceKind::Fondy];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Privat24 => privat24::SOURCE_TYPE,
            SourceKind::Fondy => fondy::SOURCE_TYPE,
        }
    }
}

/// Builds a configured source, or `None` when its settings are incomplete.
///
/// A legacy Privat24 snapshot is moved into place on the way.
pub async fn build_source(
    kind: SourceKind,
    settings: &Settings,
    data_dir: &Path,
) -> anyhow::Result<Option<Arc<dyn TransactionSource>>> {
    match kind {
        SourceKind::Privat24 => {
            let Some(source) = privat24::Privat24Source::from_settings(&settings.privat24, data_dir.to_path_buf())?
            else {
                return Ok(None);
            };
            let store = snapshot::SnapshotStore::new(source.snapshot_path());
            store.adopt_legacy(&source.legacy_snapshot_path()).await?;
            Ok(Some(Arc::new(source)))
        }
        SourceKind::Fondy => {
            let source = fondy::FondySource::from_settings(&settings.fondy, data_dir.to_path_buf())?;
            Ok(source.map(|s| Arc::new(s) as Arc<dyn TransactionSource>))
        }
    }
}
