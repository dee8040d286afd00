//! Reconciliation engine with in-memory sources and sinks
//!
//! Run with: cargo test --test reconcile_engine_test

mod common;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use common::temp_pool;
use kasabot::checkbox::{CatalogItem, CheckboxError, Good, ReceiptArtifact, SaleError};
use kasabot::reconcile::{Ledger, Notifier, ReceiptIssuer, ReconcileEngine, Transaction, TransactionSource};
use kasabot::storage::get_connection;
use kasabot::storage::transactions::get_or_create_state;

const SOURCE: &str = "test";

/// Records are `{"id", "ts", "sum", "ok"}`.
struct FakeSource {
    dir: PathBuf,
    window: Mutex<Vec<Value>>,
    fail: AtomicBool,
}

impl FakeSource {
    fn new(dir: &TempDir) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.path().to_path_buf(),
            window: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn set_window(&self, records: Vec<Value>) {
        *self.window.lock().unwrap() = records;
    }
}

#[async_trait]
impl TransactionSource for FakeSource {
    fn source_type(&self) -> &str {
        SOURCE
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("transactions-test.json")
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("statement API is down");
        }
        Ok(self.window.lock().unwrap().clone())
    }

    fn normalize(&self, raw: &Value) -> Result<Transaction, String> {
        let key = raw["id"].as_str().ok_or("missing id")?.to_string();
        let ts = NaiveDateTime::parse_from_str(raw["ts"].as_str().ok_or("missing ts")?, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| e.to_string())?;
        let amount = raw["sum"].as_i64().ok_or("missing sum")?;
        Ok(Transaction {
            key,
            ts,
            code: "Оплата".to_string(),
            name: "Оплата".to_string(),
            sender: String::new(),
            sum: format!("{}.00", amount / 100),
            amount,
            eligible: raw["ok"].as_bool().unwrap_or(true),
        })
    }
}

#[derive(Default)]
struct FakeNotifier {
    texts: Mutex<Vec<String>>,
    receipts: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_receipt(&self, artifact: &ReceiptArtifact) -> anyhow::Result<()> {
        self.receipts.lock().unwrap().push(artifact.receipt_id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeIssuer {
    failing: AtomicBool,
    /// Sale totals in kopecks that fail while listed
    failing_totals: Mutex<HashSet<i64>>,
    sold: Mutex<Vec<Vec<Good>>>,
}

fn goods_total(goods: &[Good]) -> i64 {
    goods.iter().map(|g| g.price * g.quantity / 1000).sum()
}

#[async_trait]
impl ReceiptIssuer for FakeIssuer {
    async fn catalog(&self) -> Vec<CatalogItem> {
        vec![CatalogItem {
            code: "ticket".to_string(),
            name: "Квиток".to_string(),
            price: 5000,
        }]
    }

    async fn issue(&self, goods: &[Good]) -> Result<ReceiptArtifact, SaleError> {
        let total = goods_total(goods);
        if self.failing.load(Ordering::SeqCst) || self.failing_totals.lock().unwrap().contains(&total) {
            return Err(SaleError::NotCreated(CheckboxError::Api("backend down".to_string())));
        }
        let mut sold = self.sold.lock().unwrap();
        sold.push(goods.to_vec());
        Ok(ReceiptArtifact {
            receipt_id: format!("receipt-{}", sold.len()),
            tax_url: None,
            image: Vec::new(),
            text: Some("ЧЕК".to_string()),
        })
    }
}

#[derive(Default)]
struct FakeLedger {
    /// Sums (second column) whose rows are refused
    failing: Mutex<HashSet<String>>,
    rows: Mutex<Vec<(String, Vec<Value>)>>,
}

#[async_trait]
impl Ledger for FakeLedger {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn append_row(&self, worksheet: &str, row: Vec<Value>) -> anyhow::Result<()> {
        let sum = row.get(1).and_then(Value::as_str).unwrap_or_default();
        if self.failing.lock().unwrap().contains(sum) {
            anyhow::bail!("sheets quota exceeded");
        }
        self.rows.lock().unwrap().push((worksheet.to_string(), row));
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    pool: Arc<kasabot::DbPool>,
    source: Arc<FakeSource>,
    notifier: Arc<FakeNotifier>,
    issuer: Arc<FakeIssuer>,
    ledger: Arc<FakeLedger>,
    engine: ReconcileEngine,
}

impl Harness {
    fn new(worksheet: Option<&str>) -> Self {
        let (dir, pool) = temp_pool();
        let pool = Arc::new(pool);
        let source = FakeSource::new(&dir);
        let notifier = Arc::new(FakeNotifier::default());
        let issuer = Arc::new(FakeIssuer::default());
        let ledger = Arc::new(FakeLedger::default());

        let engine = ReconcileEngine::new(
            source.clone(),
            pool.clone(),
            notifier.clone(),
            issuer.clone(),
            ledger.clone(),
        )
        .with_worksheet(worksheet.map(str::to_string));

        Self {
            _dir: dir,
            pool,
            source,
            notifier,
            issuer,
            ledger,
            engine,
        }
    }

    fn texts(&self) -> Vec<String> {
        self.notifier.texts.lock().unwrap().clone()
    }

    fn sold_prices(&self) -> Vec<i64> {
        self.issuer
            .sold
            .lock()
            .unwrap()
            .iter()
            .map(|goods| goods_total(goods))
            .collect()
    }

    fn ledger_sums(&self) -> Vec<String> {
        self.ledger
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|(_, row)| row[1].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn state(&self, key: &str) -> kasabot::storage::transactions::ProcessingState {
        let conn = get_connection(&self.pool).unwrap();
        get_or_create_state(&conn, SOURCE, key, None).unwrap()
    }
}

fn record(id: &str, ts: &str, sum: i64) -> Value {
    json!({"id": id, "ts": ts, "sum": sum})
}

#[tokio::test]
async fn test_first_window_is_baseline() {
    let h = Harness::new(Some("Безготівка"));
    h.source.set_window(vec![record("old-1", "2024-03-01 10:00:00", 5000)]);

    let report = h.engine.run_cycle().await;

    assert!(report.baseline);
    assert_eq!(report.fetched, 1);
    assert!(h.texts().is_empty());
    assert!(h.sold_prices().is_empty());

    let old = h.state("old-1");
    assert!(old.notified && old.receipted && old.recorded);

    let report = h.engine.run_cycle().await;
    assert!(!report.baseline);
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn test_new_transaction_processed_once() {
    let h = Harness::new(Some("Безготівка"));
    h.source.set_window(vec![record("old-1", "2024-03-01 10:00:00", 5000)]);
    h.engine.run_cycle().await;

    h.source.set_window(vec![
        record("old-1", "2024-03-01 10:00:00", 5000),
        record("new-1", "2024-03-02 09:00:00", 15000),
    ]);

    let report = h.engine.run_cycle().await;
    assert_eq!(report.pending, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.texts(), vec!["💸 Безготівкове зарахування: 150.00 грн".to_string()]);
    assert_eq!(*h.notifier.receipts.lock().unwrap(), vec!["receipt-1".to_string()]);

    // 150.00 is three tickets at 50.00.
    let sold = h.issuer.sold.lock().unwrap().clone();
    assert_eq!(sold[0][0].code, "ticket");
    assert_eq!(sold[0][0].quantity, 3000);

    let rows = h.ledger.rows.lock().unwrap().clone();
    assert_eq!(rows, vec![("Безготівка".to_string(), vec![json!("2024-03-02"), json!("150.00"), json!("")])]);

    let report = h.engine.run_cycle().await;
    assert_eq!(report.pending, 0);
    assert_eq!(h.texts().len(), 1);
    assert_eq!(h.sold_prices().len(), 1);
}

#[tokio::test]
async fn test_pending_processed_in_timestamp_order() {
    let h = Harness::new(None);
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.source.set_window(vec![
        record("b", "2024-03-02 12:00:00", 30000),
        record("c", "2024-03-02 08:00:00", 10000),
        record("a", "2024-03-02 12:00:00", 20000),
    ]);
    h.engine.run_cycle().await;

    // Same timestamp falls back to key order.
    assert_eq!(h.sold_prices(), vec![10000, 20000, 30000]);
}

#[tokio::test]
async fn test_failed_receipt_retried_without_second_notification() {
    let h = Harness::new(None);
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.issuer.failing.store(true, Ordering::SeqCst);
    h.source.set_window(vec![record("tx", "2024-03-02 09:00:00", 5000)]);

    let report = h.engine.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(
        h.texts(),
        vec![
            "💸 Безготівкове зарахування: 50.00 грн".to_string(),
            "Помилка створення чеку!".to_string()
        ]
    );

    h.issuer.failing.store(false, Ordering::SeqCst);
    let report = h.engine.run_cycle().await;

    assert_eq!(report.failed, 0);
    assert_eq!(h.texts().len(), 2);
    assert_eq!(h.sold_prices(), vec![5000]);
}

#[tokio::test]
async fn test_ineligible_transactions_ignored() {
    let h = Harness::new(Some("Безготівка"));
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.source
        .set_window(vec![json!({"id": "debit", "ts": "2024-03-02 09:00:00", "sum": 5000, "ok": false})]);
    let report = h.engine.run_cycle().await;

    assert_eq!(report.fetched, 1);
    assert_eq!(report.pending, 0);
    assert!(h.texts().is_empty());
    assert!(h.ledger.rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_keeps_snapshot() {
    let h = Harness::new(None);
    h.source.set_window(vec![record("old-1", "2024-03-01 10:00:00", 5000)]);
    h.engine.run_cycle().await;

    let snapshot = h.source.snapshot_path();
    let before = std::fs::read_to_string(&snapshot).unwrap();

    h.source.fail.store(true, Ordering::SeqCst);
    h.source.set_window(vec![record("new-1", "2024-03-02 10:00:00", 5000)]);
    let report = h.engine.run_cycle().await;

    assert!(report.fetch_failed);
    assert_eq!(std::fs::read_to_string(&snapshot).unwrap(), before);
    assert!(h.sold_prices().is_empty());
}

#[tokio::test]
async fn test_malformed_record_skipped() {
    let h = Harness::new(None);
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.source.set_window(vec![
        json!({"id": "broken", "ts": "yesterday", "sum": 5000}),
        record("fine", "2024-03-02 10:00:00", 5000),
    ]);
    let report = h.engine.run_cycle().await;

    assert_eq!(report.fetched, 2);
    assert_eq!(report.pending, 1);
    assert_eq!(h.sold_prices(), vec![5000]);
}

#[tokio::test]
async fn test_failure_notice_sent_once_per_transaction() {
    let h = Harness::new(None);
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.issuer.failing.store(true, Ordering::SeqCst);
    h.source.set_window(vec![record("tx", "2024-03-02 09:00:00", 5000)]);

    for _ in 0..3 {
        assert_eq!(h.engine.run_cycle().await.failed, 1);
    }

    assert_eq!(
        h.texts(),
        vec![
            "💸 Безготівкове зарахування: 50.00 грн".to_string(),
            "Помилка створення чеку!".to_string()
        ]
    );
}

#[tokio::test]
async fn test_failing_transaction_does_not_block_siblings() {
    let h = Harness::new(Some("Безготівка"));
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.issuer.failing_totals.lock().unwrap().insert(10000);
    h.source.set_window(vec![
        record("b", "2024-03-02 09:00:00", 20000),
        record("a", "2024-03-02 08:00:00", 10000),
    ]);

    let report = h.engine.run_cycle().await;

    assert_eq!(report.pending, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.sold_prices(), vec![20000]);
    // Recording does not wait for the receipt and keeps timestamp order.
    assert_eq!(h.ledger_sums(), vec!["100.00".to_string(), "200.00".to_string()]);
    assert!(!h.state("a").receipted);
    assert!(h.state("b").receipted);

    h.issuer.failing_totals.lock().unwrap().clear();
    let report = h.engine.run_cycle().await;

    assert_eq!(report.pending, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.sold_prices(), vec![20000, 10000]);
    assert_eq!(h.ledger_sums().len(), 2);
}

#[tokio::test]
async fn test_failed_ledger_append_retried_next_cycle() {
    let h = Harness::new(Some("Безготівка"));
    h.source.set_window(Vec::new());
    h.engine.run_cycle().await;

    h.ledger.failing.lock().unwrap().insert("50.00".to_string());
    h.source.set_window(vec![record("tx", "2024-03-02 09:00:00", 5000)]);

    let report = h.engine.run_cycle().await;
    assert_eq!(report.failed, 1);
    assert!(h.ledger_sums().is_empty());
    let state = h.state("tx");
    assert!(state.receipted);
    assert!(!state.recorded);

    h.ledger.failing.lock().unwrap().clear();
    let report = h.engine.run_cycle().await;

    assert_eq!(report.pending, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.ledger_sums(), vec!["50.00".to_string()]);
    assert!(h.state("tx").recorded);
    // Neither the sale nor the notification is repeated.
    assert_eq!(h.sold_prices(), vec![5000]);
    assert_eq!(h.texts().len(), 1);
}

#[tokio::test]
async fn test_lost_snapshot_keeps_unfinished_receipts() {
    let h = Harness::new(None);
    h.source.set_window(Vec::new());
    assert!(h.engine.run_cycle().await.baseline);

    h.issuer.failing.store(true, Ordering::SeqCst);
    h.source.set_window(vec![record("tx", "2024-03-02 09:00:00", 5000)]);
    assert_eq!(h.engine.run_cycle().await.failed, 1);

    std::fs::remove_file(h.source.snapshot_path()).unwrap();
    h.issuer.failing.store(false, Ordering::SeqCst);

    let report = h.engine.run_cycle().await;

    assert!(!report.baseline);
    assert_eq!(report.pending, 1);
    assert_eq!(h.sold_prices(), vec![5000]);
    assert!(h.state("tx").receipted);
}
