use serde::{Deserialize, Serialize};

use crate::models::status::Channel;

/// Contact card returned by the user service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone_number: Option<String>,
}

impl User {
    /// Non-blank contacts in channel order (email first).
    pub fn contacts(&self) -> Vec<(Channel, &str)> {
        let mut contacts = Vec::new();

        if let Some(email) = non_blank(&self.email) {
            contacts.push((Channel::Email, email));
        }

        if let Some(phone) = non_blank(&self.phone_number) {
            contacts.push((Channel::Sms, phone));
        }

        contacts
    }

    pub fn display_name(&self) -> &str {
        non_blank(&self.username).unwrap_or("customer")
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
