//! Fondy merchant report feed.

use anyhow::Context;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{Local, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha512};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::core::config::{self, FondySettings};
use crate::reconcile::traits::TransactionSource;
use crate::reconcile::transaction::{amount_field, field_text, Transaction};

pub const SOURCE_TYPE: &str = "fondy";

const WINDOW_DAYS: i64 = 7;
const ROWS_PER_PAGE: u64 = 500;
const REPORT_ID: u64 = 745;
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// `sha512("secret|company_id|date")` as lowercase hex.
pub fn signature(secret_key: &str, company_id: &str, date: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(format!("{}|{}|{}", secret_key, company_id, date).as_bytes());
    hex::encode(hasher.finalize())
}

/// Zips the report's `fields` header with each `data` row.
fn zip_rows(fields: &[String], rows: Vec<Vec<Value>>) -> Vec<Value> {
    rows.into_iter()
        .map(|row| {
            Value::Object(
                fields
                    .iter()
                    .cloned()
                    .zip(row)
                    .collect::<Map<String, Value>>(),
            )
        })
        .collect()
}

/// ISO-ish timestamps from the report, with or without fractional seconds.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%d.%m.%Y %H:%M:%S", "%Y-%m-%d %H:%M"];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ReportPage {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
    #[serde(default)]
    rows_count: u64,
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
}

pub struct FondySource {
    http: reqwest::Client,
    settings: FondySettings,
    company_id: String,
    secret_key: String,
    merchant_id: String,
    data_dir: PathBuf,
    token: Mutex<Option<CachedToken>>,
}

impl FondySource {
    /// `None` when credentials or the merchant ID are missing.
    pub fn from_settings(settings: &FondySettings, data_dir: PathBuf) -> anyhow::Result<Option<Self>> {
        let (Some(company_id), Some(secret_key)) = (
            settings.auth.id.clone().filter(|s| !s.is_empty()),
            settings.auth.secret_key.clone().filter(|s| !s.is_empty()),
        ) else {
            log::warn!("missing fondy auth credentials; ignoring...");
            return Ok(None);
        };
        let Some(merchant_id) = settings.merchant_id.clone().filter(|s| !s.is_empty()) else {
            log::warn!("missing fondy merchant id; ignoring...");
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(config::network::timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Some(Self {
            http,
            settings: settings.clone(),
            company_id,
            secret_key,
            merchant_id,
            data_dir,
            token: Mutex::new(None),
        }))
    }

    async fn request_token(&self) -> Result<String, reqwest::Error> {
        let date = Local::now().naive_local().to_string();
        let body = json!({
            "application_id": self.company_id,
            "date": date,
            "signature": signature(&self.secret_key, &self.company_id, &date),
        });

        let response: TokenResponse = self
            .http
            .post(&self.settings.token_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.token)
    }

    /// Application token, cached for an hour.
    async fn token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(token.token.clone());
            }
        }

        let token = (|| self.request_token())
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(|e: &reqwest::Error| e.is_connect())
            .await
            .context("fondy token request")?;

        *cached = Some(CachedToken {
            token: token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(token)
    }

    /// Raw report page; the body is served with a non-JSON content type.
    async fn fetch_page(&self, token: &str, page: u64, start: &str) -> Result<Vec<u8>, reqwest::Error> {
        let body = json!({
            "on_page": ROWS_PER_PAGE,
            "page": page,
            "filters": [{"s": "order_timestart", "m": "from", "v": start}],
            "merchant_id": self.merchant_id,
            "report_id": REPORT_ID,
        });

        let bytes = self
            .http
            .post(&self.settings.report_url)
            .header("Authorization", format!("Token {}", token))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TransactionSource for FondySource {
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
        let token = self.token().await?;
        let start = (Local::now().date_naive() - chrono::Duration::days(WINDOW_DAYS))
            .and_time(NaiveTime::MIN)
            .to_string();

        let mut result = Vec::new();
        let mut page = 0;
        let mut rows_count = 1;

        while rows_count > ROWS_PER_PAGE * page {
            page += 1;
            let body = (|| self.fetch_page(&token, page, &start))
                .retry(ExponentialBuilder::default().with_max_times(3))
                .when(|e: &reqwest::Error| e.is_connect())
                .notify(|e: &reqwest::Error, after: Duration| {
                    log::warn!("fondy: retrying in {:?}: {}", after, e);
                })
                .await
                .context("fondy report request")?;
            let report: ReportPage =
                serde_json::from_slice(&body).with_context(|| format!("fondy report page {}", page))?;

            rows_count = report.rows_count;
            result.extend(zip_rows(&report.fields, report.data));
        }

        Ok(result)
    }

    fn normalize(&self, raw: &Value) -> Result<Transaction, String> {
        let key = field_text(raw, "payment_id").ok_or("missing payment_id")?;
        let ts_raw = field_text(raw, "order_timestart").ok_or("missing order_timestart")?;
        let ts = parse_timestamp(&ts_raw).ok_or_else(|| format!("invalid order_timestart: {}", ts_raw))?;
        let order_id = field_text(raw, "order_id").ok_or("missing order_id")?;
        let (sum, amount) = amount_field(raw, "actual_amount")?;
        let sender = field_text(raw, "sender_email").unwrap_or_default();
        let status = field_text(raw, "order_status").unwrap_or_default();

        Ok(Transaction {
            key,
            ts,
            code: order_id.clone(),
            name: order_id,
            sender,
            sum,
            amount,
            eligible: status == "approved",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FondyAuth;
    use pretty_assertions::assert_eq;

    fn source() -> FondySource {
        let settings = FondySettings {
            auth: FondyAuth {
                id: Some("1000".to_string()),
                secret_key: Some("secret".to_string()),
            },
            merchant_id: Some("42".to_string()),
            ..FondySettings::default()
        };
        FondySource::from_settings(&settings, PathBuf::from(".")).unwrap().unwrap()
    }

    #[test]
    fn test_signature_is_sha512_hex() {
        let sig = signature("secret", "1000", "2024-01-01 00:00:00");
        assert_eq!(sig.len(), 128);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(sig, signature("secret", "1001", "2024-01-01 00:00:00"));
    }

    #[test]
    fn test_zip_rows() {
        let fields = vec!["payment_id".to_string(), "order_status".to_string()];
        let rows = zip_rows(&fields, vec![vec![json!(1), json!("approved")]]);
        assert_eq!(rows, vec![json!({"payment_id": 1, "order_status": "approved"})]);
    }

    #[test]
    fn test_normalize() {
        let raw = json!({
            "payment_id": 555,
            "order_timestart": "2024-03-05 10:00:01",
            "order_id": "order-77",
            "actual_amount": "250.00",
            "sender_email": "buyer@example.com",
            "order_status": "approved"
        });

        let tx = source().normalize(&raw).unwrap();
        assert_eq!(tx.key, "555");
        assert_eq!(tx.code, "order-77");
        assert_eq!(tx.name, "order-77");
        assert_eq!(tx.amount, 25000);
        assert_eq!(tx.sender, "buyer@example.com");
        assert!(tx.eligible);

        let declined = json!({
            "payment_id": 556,
            "order_timestart": "2024-03-05 10:00:01",
            "order_id": "order-78",
            "actual_amount": 10,
            "sender_email": null,
            "order_status": "declined"
        });
        let tx = source().normalize(&declined).unwrap();
        assert!(!tx.eligible);
        assert_eq!(tx.sender, "");
    }
}
