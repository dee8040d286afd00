//! Receipt lifecycle: sell, wait for the fiscal signature, fetch the artifact.

use crate::checkbox::client::{ArtifactKind, CheckboxClient};
use crate::checkbox::error::{CheckboxError, CheckboxResult, ErrorKind};
use crate::checkbox::models::{
    CatalogItem, Good, Page, Payment, PaymentType, Receipt, ReceiptArtifact, ReceiptRef, SellGood, SellRequest,
};
use crate::checkbox::shift::ShiftController;
use crate::core::money;
use crate::core::retry::{poll_until, PollConfig, PollOutcome, Probe};

/// Rejects lines with a non-positive price or quantity.
pub fn validate_goods(goods: &[Good]) -> CheckboxResult<()> {
    if goods.is_empty() {
        return Err(CheckboxError::Validation("Немає позицій".to_string()));
    }
    if goods.iter().any(|good| good.price <= 0) {
        return Err(CheckboxError::Validation("Невірна ціна".to_string()));
    }
    if goods.iter().any(|good| good.quantity <= 0) {
        return Err(CheckboxError::Validation("Невірна кількість".to_string()));
    }
    receipt_total(goods)?;
    Ok(())
}

/// Sum of all lines in kopecks. Each line is rounded separately.
pub fn receipt_total(goods: &[Good]) -> CheckboxResult<i64> {
    goods
        .iter()
        .try_fold(0_i64, |total, good| {
            money::line_total(good.price, good.quantity).and_then(|line| total.checked_add(line))
        })
        .ok_or_else(|| CheckboxError::Validation("Невірна сума".to_string()))
}

fn sell_request(goods: &[Good], cashless: bool) -> CheckboxResult<SellRequest> {
    let kind = if cashless {
        PaymentType::Cashless
    } else {
        PaymentType::Cash
    };

    Ok(SellRequest {
        goods: goods
            .iter()
            .map(|good| SellGood {
                good: CatalogItem {
                    code: good.code.clone(),
                    name: good.name.clone(),
                    price: good.price,
                },
                quantity: good.quantity,
            })
            .collect(),
        payments: vec![Payment {
            kind,
            value: receipt_total(goods)?,
            label: None,
        }],
    })
}

#[derive(Clone)]
pub struct ReceiptController {
    client: CheckboxClient,
    shifts: ShiftController,
    sign_poll: PollConfig,
}

impl ReceiptController {
    pub fn new(client: CheckboxClient) -> Self {
        Self {
            shifts: ShiftController::new(client.clone()),
            client,
            sign_poll: PollConfig::receipt(),
        }
    }

    /// Overrides the signing and shift polling schedules.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.shifts = self.shifts.with_poll(poll);
        self.sign_poll = poll;
        self
    }

    pub fn shifts(&self) -> &ShiftController {
        &self.shifts
    }

    /// Creates a sale and returns the receipt ID.
    ///
    /// Order: local validation, signature check, open shift, sell request.
    pub async fn sell(&self, goods: &[Good], cashless: bool) -> CheckboxResult<String> {
        validate_goods(goods)?;
        self.client.ensure_signature().await?;
        self.shifts.ensure_open().await?;

        let request = sell_request(goods, cashless)?;
        let receipt: Receipt = self
            .client
            .post_json("/receipts/sell", &request, false, ErrorKind::Receipt)
            .await?;

        log::info!("receipt: {}", receipt.id);
        Ok(receipt.id)
    }

    /// Polls until the receipt is DONE or SIGNED and returns its tax URL.
    pub async fn wait_for_signature(&self, receipt_id: &str) -> CheckboxResult<Option<String>> {
        let path = format!("/receipts/{}", receipt_id);
        let path = path.as_str();

        let outcome = poll_until(self.sign_poll, || async move {
            match self.client.get_json::<Receipt>(path, &[], ErrorKind::Receipt).await {
                Ok(receipt) if receipt.is_signed() => Probe::Done(receipt.tax_url),
                Ok(receipt) => Probe::Pending(receipt.status),
                Err(e) => {
                    log::warn!("receipt status check failed: {}", e);
                    Probe::Unknown
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(tax_url) => Ok(tax_url),
            PollOutcome::TimedOut { last, .. } => {
                log::error!("receipt signing error: {} ({:?})", receipt_id, last);
                Err(CheckboxError::Receipt("Не вдалось підписати чек".to_string()))
            }
        }
    }

    /// Image and text of a signed receipt, in the configured presentation.
    pub async fn get_artifact(&self, receipt_id: &str, tax_url: Option<String>) -> CheckboxResult<ReceiptArtifact> {
        let (image, text) = match self.client.config().artifact {
            ArtifactKind::Png => {
                let png = self
                    .client
                    .get_bytes(&format!("/receipts/{}/png", receipt_id), &[], ErrorKind::Receipt)
                    .await?;
                (png, None)
            }
            ArtifactKind::QrWithText => {
                let qr = self
                    .client
                    .get_bytes(&format!("/receipts/{}/qrcode", receipt_id), &[], ErrorKind::Receipt)
                    .await?;

                let text = self.receipt_text(receipt_id).await?;
                (qr, Some(text))
            }
        };

        Ok(ReceiptArtifact {
            receipt_id: receipt_id.to_string(),
            tax_url,
            image,
            text,
        })
    }

    /// Plain-text rendering at the configured print width.
    pub async fn receipt_text(&self, receipt_id: &str) -> CheckboxResult<String> {
        let query: Vec<(&str, String)> = self
            .client
            .config()
            .receipt_width
            .map(|width| vec![("width", width.to_string())])
            .unwrap_or_default();
        self.client
            .get_text(&format!("/receipts/{}/text", receipt_id), &query, ErrorKind::Receipt)
            .await
    }

    /// Sell, sign and fetch in one go.
    ///
    /// A failure after the sale is returned as `SaleError::Unsigned` so the
    /// caller can say that the receipt exists.
    pub async fn sell_and_sign(&self, goods: &[Good], cashless: bool) -> Result<ReceiptArtifact, SaleError> {
        let receipt_id = self.sell(goods, cashless).await.map_err(SaleError::NotCreated)?;

        let signed = async {
            let tax_url = self.wait_for_signature(&receipt_id).await?;
            self.get_artifact(&receipt_id, tax_url).await
        };

        signed.await.map_err(|source| SaleError::Unsigned {
            receipt_id: receipt_id.clone(),
            source,
        })
    }

    /// Already-signed receipt by ID, for resending.
    pub async fn fetch_signed(&self, receipt_id: &str) -> CheckboxResult<ReceiptArtifact> {
        let receipt: Receipt = self
            .client
            .get_json(&format!("/receipts/{}", receipt_id), &[], ErrorKind::Receipt)
            .await?;
        self.get_artifact(receipt_id, receipt.tax_url).await
    }

    /// Receipt ID by fiscal code, `None` if nothing matches.
    pub async fn search(&self, fiscal_code: &str) -> CheckboxResult<Option<String>> {
        let page: Page<ReceiptRef> = self
            .client
            .get_json(
                "/receipts/search",
                &[("fiscal_code", fiscal_code.to_string())],
                ErrorKind::Receipt,
            )
            .await?;
        Ok(page.results.into_iter().next().map(|r| r.id))
    }
}

/// Where a combined sale failed.
#[derive(Debug, thiserror::Error)]
pub enum SaleError {
    #[error(transparent)]
    NotCreated(CheckboxError),
    #[error("{source}")]
    Unsigned {
        receipt_id: String,
        #[source]
        source: CheckboxError,
    },
}

impl SaleError {
    pub fn into_inner(self) -> CheckboxError {
        match self {
            SaleError::NotCreated(e) => e,
            SaleError::Unsigned { source, .. } => source,
        }
    }
}
