//! Reconciliation loop shared by all payment sources.
//!
//! Every cycle re-fetches the whole window, persists it, and drives the
//! three per-transaction side effects (notify, receipt, record) until each
//! has succeeded once. Progress lives in the `transactions` table, so a
//! restart only performs missing work.

use chrono::{Local, NaiveTime};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use crate::checkbox::{CatalogItem, SaleError};
use crate::reconcile::goods::transaction_to_goods;
use crate::reconcile::snapshot::SnapshotStore;
use crate::reconcile::traits::{Ledger, Notifier, ReceiptIssuer, TransactionSource};
use crate::reconcile::transaction::Transaction;
use crate::storage::db::DbPool;
use crate::storage::get_connection;
use crate::storage::transactions::{self as state_db, Flag};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The window could not be fetched or persisted; nothing was processed
    pub fetch_failed: bool,
    /// First window of a source, stored as already processed
    pub baseline: bool,
    pub fetched: usize,
    /// Transactions that still needed work at the start of the cycle
    pub pending: usize,
    /// Transactions left with unfinished work at the end of the cycle
    pub failed: usize,
}

/// Parses `HH:MM` as used by `checkbox.shift_close_time`.
pub fn parse_cutoff(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// True once the daily cutoff has passed.
pub fn past_cutoff(now: NaiveTime, cutoff: Option<NaiveTime>) -> bool {
    cutoff.is_some_and(|cutoff| now >= cutoff)
}

pub struct ReconcileEngine {
    source: Arc<dyn TransactionSource>,
    db_pool: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    issuer: Arc<dyn ReceiptIssuer>,
    ledger: Arc<dyn Ledger>,
    /// Worksheet for ledger rows; the record step is skipped when unset
    worksheet: Option<String>,
    snapshot: SnapshotStore,
    cutoff: Option<NaiveTime>,
}

impl ReconcileEngine {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        db_pool: Arc<DbPool>,
        notifier: Arc<dyn Notifier>,
        issuer: Arc<dyn ReceiptIssuer>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let snapshot = SnapshotStore::new(source.snapshot_path());
        Self {
            source,
            db_pool,
            notifier,
            issuer,
            ledger,
            worksheet: None,
            snapshot,
            cutoff: None,
        }
    }

    #[must_use]
    pub fn with_worksheet(mut self, worksheet: Option<String>) -> Self {
        self.worksheet = worksheet.filter(|w| !w.is_empty());
        self
    }

    #[must_use]
    pub fn with_cutoff(mut self, cutoff: Option<NaiveTime>) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn source_type(&self) -> &str {
        self.source.source_type()
    }

    fn ledger_enabled(&self) -> bool {
        self.worksheet.is_some() && self.ledger.is_enabled()
    }

    /// Runs cycles forever, one per polling interval.
    pub async fn run(self) {
        let period = self.source.polling_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Reconciler {} started (interval: {}s, ledger: {})",
            self.source_type(),
            period.as_secs(),
            if self.ledger_enabled() { "on" } else { "off" }
        );

        loop {
            ticker.tick().await;

            if past_cutoff(Local::now().time(), self.cutoff) {
                log::debug!("{}: past shift close time, skipping cycle", self.source_type());
                continue;
            }

            let report = self.run_cycle().await;
            if report.failed > 0 {
                log::warn!(
                    "{}: {} of {} pending transaction(s) still unfinished",
                    self.source_type(),
                    report.failed,
                    report.pending
                );
            }
        }
    }

    /// One fetch-persist-process pass.
    pub async fn run_cycle(&self) -> CycleReport {
        let source = self.source_type();
        let mut report = CycleReport::default();

        let raw = match self.source.fetch().await {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("{}: fetch failed: {:#}", source, e);
                report.fetch_failed = true;
                return report;
            }
        };
        report.fetched = raw.len();

        let baseline = match self.is_first_window() {
            Ok(baseline) => baseline,
            Err(e) => {
                log::error!("{}: processing state lookup failed: {}", source, e);
                report.fetch_failed = true;
                return report;
            }
        };
        let transactions = self.normalize(&raw);

        // Baseline rows go in before the snapshot marks the source as seen.
        if baseline {
            if let Err(e) = self.store_baseline(&transactions) {
                log::error!("{}: baseline store failed: {}", source, e);
                report.fetch_failed = true;
                return report;
            }
        }

        if let Err(e) = self.snapshot.write(&raw).await {
            log::error!("{}: snapshot write to {} failed: {:#}", source, self.snapshot.path().display(), e);
            report.fetch_failed = true;
            return report;
        }

        if baseline {
            report.baseline = true;
            log::info!("{}: baseline of {} transaction(s) stored", source, transactions.len());
            return report;
        }

        let mut pending = match self.pending(transactions) {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("{}: processing state lookup failed: {}", source, e);
                return report;
            }
        };
        pending.sort_by(|(a, _), (b, _)| a.ts.cmp(&b.ts).then_with(|| a.key.cmp(&b.key)));
        report.pending = pending.len();

        if pending.is_empty() {
            log::debug!("{}: no new transactions", source);
            return report;
        }

        let catalog = self.issuer.catalog().await;

        for (transaction, state) in &pending {
            log::info!("{}: processing {} ({} грн)", source, transaction.key, transaction.sum);

            let done = self.process(transaction, state, &catalog).await;
            if !done {
                report.failed += 1;
            }
        }

        report
    }

    fn normalize(&self, raw: &[Value]) -> Vec<Transaction> {
        // The same key twice in one window is one transaction; the last record wins.
        let mut by_key: HashMap<String, Transaction> = HashMap::new();
        for record in raw {
            match self.source.normalize(record) {
                Ok(transaction) => {
                    by_key.insert(transaction.key.clone(), transaction);
                }
                Err(e) => log::warn!("{}: skipping record ({}): {}", self.source_type(), e, record),
            }
        }
        by_key.into_values().collect()
    }

    /// A source is new only with no snapshot and no stored transactions.
    fn is_first_window(&self) -> anyhow::Result<bool> {
        if self.snapshot.exists() {
            return Ok(false);
        }
        let conn = get_connection(&self.db_pool)?;
        Ok(state_db::count_states(&conn, self.source_type())? == 0)
    }

    fn store_baseline(&self, transactions: &[Transaction]) -> anyhow::Result<()> {
        let conn = get_connection(&self.db_pool)?;
        for transaction in transactions {
            state_db::mark_processed(&conn, self.source_type(), &transaction.key, Some(transaction.ts))?;
        }
        Ok(())
    }

    /// Eligible transactions with at least one side effect still to do.
    fn pending(&self, transactions: Vec<Transaction>) -> anyhow::Result<Vec<(Transaction, state_db::ProcessingState)>> {
        let conn = get_connection(&self.db_pool)?;
        let mut pending = Vec::new();

        for transaction in transactions {
            let state = state_db::get_or_create_state(&conn, self.source_type(), &transaction.key, Some(transaction.ts))?;
            if transaction.eligible && self.needs_work(&state) {
                pending.push((transaction, state));
            }
        }
        Ok(pending)
    }

    fn needs_work(&self, state: &state_db::ProcessingState) -> bool {
        !state.receipted || (self.ledger_enabled() && !state.recorded)
    }

    fn set_flag(&self, key: &str, flag: Flag) -> anyhow::Result<()> {
        let conn = get_connection(&self.db_pool)?;
        state_db::set_flag(&conn, self.source_type(), key, flag)?;
        Ok(())
    }

    /// Drives the missing side effects of one transaction. Never fails the cycle.
    ///
    /// Returns true when nothing is left to do.
    async fn process(
        &self,
        transaction: &Transaction,
        state: &state_db::ProcessingState,
        catalog: &[CatalogItem],
    ) -> bool {
        let source = self.source_type();
        let mut done = true;

        if !state.receipted {
            if !state.notified {
                match self.notifier.notify(&transaction.notification_text()).await {
                    Ok(()) => {
                        if let Err(e) = self.set_flag(&transaction.key, Flag::Notified) {
                            log::error!("{}: {}: notified flag not saved: {}", source, transaction.key, e);
                        }
                    }
                    Err(e) => {
                        log::error!("{}: {}: notify failed: {:#}", source, transaction.key, e);
                        done = false;
                    }
                }
            }

            // Failures are announced once, on the cycle that first saw the transaction.
            if !self.receipt(transaction, catalog, !state.notified).await {
                done = false;
            }
        }

        if !state.recorded && self.ledger_enabled() {
            if let Some(worksheet) = self.worksheet.as_deref() {
                match self.ledger.append_row(worksheet, transaction.ledger_row()).await {
                    Ok(()) => {
                        if let Err(e) = self.set_flag(&transaction.key, Flag::Recorded) {
                            log::error!("{}: {}: recorded flag not saved: {}", source, transaction.key, e);
                        }
                    }
                    Err(e) => {
                        log::error!("{}: {}: ledger append failed: {:#}", source, transaction.key, e);
                        done = false;
                    }
                }
            }
        }

        done
    }

    /// Sell, sign, fetch and broadcast. True when the receipt is signed.
    async fn receipt(&self, transaction: &Transaction, catalog: &[CatalogItem], announce_failure: bool) -> bool {
        let source = self.source_type();
        let goods = transaction_to_goods(transaction, catalog);

        match self.issuer.issue(&goods).await {
            Ok(artifact) => {
                if let Err(e) = self.set_flag(&transaction.key, Flag::Receipted) {
                    log::error!("{}: {}: receipted flag not saved: {}", source, transaction.key, e);
                    return false;
                }
                log::info!("{}: {}: receipt {}", source, transaction.key, artifact.receipt_id);

                if let Err(e) = self.notifier.send_receipt(&artifact).await {
                    log::warn!("{}: {}: receipt broadcast failed: {:#}", source, transaction.key, e);
                }
                true
            }
            Err(err) => {
                let notice = match &err {
                    SaleError::NotCreated(_) => "Помилка створення чеку!",
                    SaleError::Unsigned { .. } => "Чек успішно створено",
                };
                log::error!("{}: {}: receipt failed: {}", source, transaction.key, err);
                if !announce_failure {
                    return false;
                }

                if let Err(e) = self.notifier.notify(notice).await {
                    log::warn!("{}: {}: failure notice not sent: {:#}", source, transaction.key, e);
                }
                false
            }
        }
    }
}
