//! Wire types of the fiscal API. Amounts are integer kopecks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cashier {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub signature_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShiftBalance {
    /// Cash currently in the drawer
    pub balance: i64,
    pub cash_sales: i64,
    pub card_sales: i64,
    pub cash_returns: i64,
    pub card_returns: i64,
    pub service_in: i64,
    pub service_out: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Shift {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub balance: ShiftBalance,
}

impl Shift {
    pub fn is_opened(&self) -> bool {
        self.status == "OPENED"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tax_url: Option<String>,
}

impl Receipt {
    pub fn is_signed(&self) -> bool {
        matches!(self.status.as_str(), "DONE" | "SIGNED")
    }
}

/// Item of the goods catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub code: String,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptRef {
    pub id: String,
}

/// A sale line: catalog fields plus quantity in thousandths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Good {
    pub code: String,
    pub name: String,
    pub price: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentType {
    Cash,
    Cashless,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    #[serde(rename = "type")]
    pub kind: PaymentType,
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellGood {
    pub good: CatalogItem,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellRequest {
    pub goods: Vec<SellGood>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRequest {
    pub payment: Payment,
}

/// Signed receipt ready to be shown to a person.
#[derive(Debug, Clone)]
pub struct ReceiptArtifact {
    pub receipt_id: String,
    pub tax_url: Option<String>,
    /// QR code, or the whole receipt rendered as PNG
    pub image: Vec<u8>,
    /// Plain-text rendering; absent when the PNG is used
    pub text: Option<String>,
}
