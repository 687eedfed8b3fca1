//! Receipt DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ReceiptSnapshot;

#[derive(Debug, Deserialize)]
pub struct ListReceiptsQuery {
    pub payment_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    #[serde(default = "super::invoice::default_page_size")]
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListReceiptsResponse {
    pub receipts: Vec<ReceiptSnapshot>,
    pub next_page_token: Option<Uuid>,
}
