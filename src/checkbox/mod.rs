//! Checkbox fiscal API: client, shift and receipt lifecycles, goods catalog

pub mod client;
pub mod error;
pub mod goods;
pub mod models;
pub mod receipt;
pub mod shift;

pub use client::{ArtifactKind, CheckboxClient, ClientConfig, Credentials};
pub use error::{CheckboxError, CheckboxResult, ErrorKind};
pub use goods::CatalogCache;
pub use models::{CatalogItem, Good, ReceiptArtifact};
pub use receipt::{ReceiptController, SaleError};
pub use shift::{CloseOutcome, ShiftController};
