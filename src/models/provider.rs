use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub from: String,
    pub to: String,
    pub body: String,
}

/// Acknowledgement body returned by both providers on success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderReceipt {
    #[serde(default)]
    pub id: Option<String>,
}
