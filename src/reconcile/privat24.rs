//! Privat24 business statement feed.

use anyhow::Context;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{Local, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::config::{self, Privat24Settings};
use crate::reconcile::traits::TransactionSource;
use crate::reconcile::transaction::{amount_field, field_text, Transaction};

pub const SOURCE_TYPE: &str = "privat24";

/// Days of history fetched every cycle.
const WINDOW_DAYS: i64 = 7;

/// Payer name at the end of the narrative.
static SENDER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.+(?:,\s*|Переказ(?:и:)?\s+вiд\s+|Вiд\s+)(\S+\s+\S+(?:\s+\S+)?)\s*$")
        .expect("Invalid Privat24 sender regex")
});

pub fn parse_sender(narrative: &str) -> Option<String> {
    SENDER_PATTERN
        .captures(narrative)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Day-first timestamps as printed by the statement API.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = ["%d.%m.%Y %H:%M:%S", "%d.%m.%Y %H:%M", "%d-%m-%Y %H:%M:%S", "%d/%m/%Y %H:%M:%S"];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%d.%m.%Y")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn lowercase_keys(raw: &Value) -> Value {
    match raw {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct StatementPage {
    #[serde(default)]
    transactions: Vec<Value>,
    #[serde(default)]
    exist_next_page: bool,
    #[serde(default)]
    next_page_id: Option<String>,
}

pub struct Privat24Source {
    http: reqwest::Client,
    settings: Privat24Settings,
    api_id: String,
    api_token: String,
    data_dir: PathBuf,
}

impl Privat24Source {
    /// `None` when API credentials are not configured.
    pub fn from_settings(settings: &Privat24Settings, data_dir: PathBuf) -> anyhow::Result<Option<Self>> {
        let (Some(api_id), Some(api_token)) = (
            settings.api.id.clone().filter(|s| !s.is_empty()),
            settings.api.token.clone().filter(|s| !s.is_empty()),
        ) else {
            log::warn!("missing privat24 api credentials; ignoring...");
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(config::network::timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Some(Self {
            http,
            settings: settings.clone(),
            api_id,
            api_token,
            data_dir,
        }))
    }

    /// Legacy snapshot name used before more sources existed.
    pub fn legacy_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("transactions.json")
    }

    fn is_eligible(&self, trantype: &str, account: &str) -> bool {
        let accounts: Vec<&String> = self.settings.accounts.iter().filter(|a| !a.is_empty()).collect();
        trantype == "C" && (accounts.is_empty() || accounts.iter().any(|a| a.as_str() == account))
    }

    async fn fetch_page(&self, start_date: &str, follow_id: &str) -> Result<StatementPage, reqwest::Error> {
        self.http
            .get(&self.settings.api_url)
            .header("id", &self.api_id)
            .header("token", &self.api_token)
            .header("Content-Type", "application/json; charset=utf8")
            .query(&[("startDate", start_date), ("followId", follow_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl TransactionSource for Privat24Source {
    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.settings.polling_interval * 60)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("transactions-{}.json", SOURCE_TYPE))
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        let start_date = (Local::now().date_naive() - chrono::Duration::days(WINDOW_DAYS))
            .format("%d-%m-%Y")
            .to_string();

        let mut transactions = Vec::new();
        let mut follow_id = String::new();

        loop {
            let page = (|| self.fetch_page(&start_date, &follow_id))
                .retry(ExponentialBuilder::default().with_max_times(3))
                .when(|e: &reqwest::Error| e.is_connect() || e.is_timeout())
                .notify(|e: &reqwest::Error, after: Duration| {
                    log::warn!("privat24: retrying in {:?}: {}", after, e);
                })
                .await
                .context("privat24 statement request")?;

            transactions.extend(page.transactions);

            match page.next_page_id {
                Some(next) if page.exist_next_page && !next.is_empty() => follow_id = next,
                _ => break,
            }
        }

        Ok(transactions)
    }

    fn normalize(&self, raw: &Value) -> Result<Transaction, String> {
        let record = lowercase_keys(raw);

        let key = field_text(&record, "technical_transaction_id").ok_or("missing technical_transaction_id")?;
        let ts_raw = field_text(&record, "date_time_dat_od_tim_p").ok_or("missing date_time_dat_od_tim_p")?;
        let ts = parse_timestamp(&ts_raw).ok_or_else(|| format!("invalid date_time_dat_od_tim_p: {}", ts_raw))?;
        let (sum, amount) = amount_field(&record, "sum_e")?;

        let sender = field_text(&record, "osnd")
            .and_then(|osnd| parse_sender(&osnd))
            .unwrap_or_default();
        let trantype = field_text(&record, "trantype").unwrap_or_default();
        let account = field_text(&record, "aut_my_acc").unwrap_or_default();

        let name = self.settings.good_name_default.clone();
        Ok(Transaction {
            key,
            ts,
            code: format!("{} {}", name, sum),
            name,
            sender,
            sum,
            amount,
            eligible: self.is_eligible(&trantype, &account),
        })
    }
}
