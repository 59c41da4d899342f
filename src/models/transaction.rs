use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One row per payment attempt. Rows are append-only: the only mutation ever
/// applied is the single pending -> terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub license_plate: String,
    pub phone_number: String,
    pub amount: u32,
    pub status: TransactionStatus,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub license_plate: String,
    pub phone_number: String,
    pub amount: u32,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
}

/// Terminal outcome reported by the gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success { receipt_number: String },
    Failed { description: String },
}

// Gateway callback payload, field names as M-Pesa sends them.
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

impl StkCallback {
    /// Receipt number from the metadata items, matched by name so item
    /// reordering in the callback cannot break extraction.
    pub fn receipt_number(&self) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == "MpesaReceiptNumber")
            .and_then(|item| item.value.as_str().map(str::to_string))
    }
}
