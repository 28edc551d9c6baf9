use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{event::DeliveryEvent, user::User};

pub type TemplateParams = HashMap<String, Value>;

pub const EMAIL_BODY: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif;">
    <p>Hello, {{userName}}!</p>
    <p>Delivery #{{deliveryId}} {{trackingNumber}} is now: <strong>{{statusDescription}}</strong>.</p>
    <p><a href="{{trackingUrl}}">Track your delivery</a></p>
</body>
</html>"#;

pub const SMS_BODY: &str =
    "Delivery #{{deliveryId}}: {{statusDescription}}. Track it at {{trackingUrl}}";

pub fn email_subject(event_type: &str) -> &'static str {
    match event_type {
        "CREATED" => "Your order has been accepted",
        "UPDATED" => "Your delivery status has changed",
        "COMPLETED" => "Your order has been delivered",
        _ => "Delivery status update",
    }
}

pub fn status_description(status: &str) -> &str {
    match status {
        "PENDING" => "Awaiting dispatch",
        "IN_TRANSIT" => "In transit",
        "DELIVERED" => "Delivered",
        "CANCELLED" => "Cancelled",
        other => other,
    }
}

/// Parameters shared by every channel template. Event extras are included
/// but never shadow the computed keys.
pub fn template_params(event: &DeliveryEvent, user: &User, tracking_base_url: &str) -> TemplateParams {
    let mut params: TemplateParams = event
        .additional_data
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let base_url = tracking_base_url.trim_end_matches('/');
    let tracking_url = match &event.tracking_number {
        Some(tracking_number) => format!("{}/{}", base_url, tracking_number),
        None => base_url.to_string(),
    };

    params.insert("userName".into(), Value::from(user.display_name()));
    params.insert("deliveryId".into(), Value::from(event.delivery_id));
    params.insert(
        "trackingNumber".into(),
        event
            .tracking_number
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    params.insert("status".into(), Value::from(event.status.as_str()));
    params.insert(
        "statusDescription".into(),
        Value::from(status_description(&event.status)),
    );
    params.insert("trackingUrl".into(), Value::from(tracking_url));

    params
}

pub fn render(template: &str, params: &TemplateParams) -> Result<String, Error> {
    replace_variables(template, params, false)
}

/// Like [`render`], escaping substituted values for HTML bodies.
pub fn render_html(template: &str, params: &TemplateParams) -> Result<String, Error> {
    replace_variables(template, params, true)
}

fn replace_variables(
    template: &str,
    params: &TemplateParams,
    escape: bool,
) -> Result<String, Error> {
    debug!(variable_count = params.len(), "Rendering template");

    let mut result = template.to_string();

    for (key, value) in params {
        let placeholder = format!("{{{{{}}}}}", key);
        if !result.contains(&placeholder) {
            continue;
        }

        let replacement = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            structured => structured.to_string(),
        };

        let replacement = if escape {
            escape_html(&replacement)
        } else {
            replacement
        };

        result = result.replace(&placeholder, &replacement);
    }

    if let Some(start) = result.find("{{") {
        if let Some(len) = result[start..].find("}}") {
            let missing_var = &result[start..start + len + 2];

            warn!(
                missing_variable = %missing_var,
                "Template contains unreplaced variable"
            );

            return Err(anyhow!("Missing variable in template: {}", missing_var));
        }
    }

    Ok(result)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }

    escaped
}
