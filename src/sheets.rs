//! Google Sheets ledger.
//!
//! Rows are appended through the Sheets v4 `values:append` endpoint with a
//! service-account bearer token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::{json, Value};
use url::Url;

use crate::core::config::{self, GoogleSettings};
use crate::reconcile::traits::Ledger;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets/";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];

pub struct SheetsLedger {
    http: reqwest::Client,
    auth: CustomServiceAccount,
    spreadsheet_key: String,
    api_base: Url,
}

impl SheetsLedger {
    /// `None` when the spreadsheet key or the credentials file is not configured.
    pub fn from_settings(settings: &GoogleSettings) -> Result<Option<Self>> {
        let Some(spreadsheet_key) = settings.spreadsheet_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let Some(credentials) = settings.application_credentials.as_ref() else {
            log::warn!("google.spreadsheet_key is set without application_credentials; ledger disabled");
            return Ok(None);
        };

        let auth = CustomServiceAccount::from_file(credentials)
            .with_context(|| format!("load service account {}", credentials.display()))?;
        let http = reqwest::Client::builder().timeout(config::network::timeout()).build()?;

        Ok(Some(Self {
            http,
            auth,
            spreadsheet_key,
            api_base: Url::parse(SHEETS_API)?,
        }))
    }

    fn append_url(&self, worksheet: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("invalid sheets base url"))?
            .pop_if_empty()
            .push(&self.spreadsheet_key)
            .push("values")
            .push(&format!("{}:append", worksheet));
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

#[async_trait]
impl Ledger for SheetsLedger {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn append_row(&self, worksheet: &str, row: Vec<Value>) -> Result<()> {
        let token = self.auth.token(SCOPES).await.context("google access token")?;
        let url = self.append_url(worksheet)?;

        self.http
            .post(url)
            .bearer_auth(token.as_str())
            .json(&json!({ "values": [row] }))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("append to worksheet {}", worksheet))?;

        log::info!("Appended row to worksheet {}", worksheet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_key() {
        assert!(SheetsLedger::from_settings(&GoogleSettings::default()).unwrap().is_none());
    }

    #[test]
    fn test_disabled_without_credentials() {
        let settings = GoogleSettings {
            spreadsheet_key: Some("abc".to_string()),
            ..GoogleSettings::default()
        };
        assert!(SheetsLedger::from_settings(&settings).unwrap().is_none());
    }
}
