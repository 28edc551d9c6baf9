use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const USER_ID_KEY: &str = "userId";
pub const TRACKING_NUMBER_KEY: &str = "trackingNumber";

// Largest magnitude at which every integral f64 is exact.
const MAX_EXACT_FLOAT_ID: f64 = 9_007_199_254_740_992.0;

/// Delivery lifecycle event exactly as it travels on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEventPayload {
    pub event_type: String,

    #[serde(default)]
    pub delivery_id: Value,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub timestamp: Option<Value>,

    #[serde(default)]
    pub additional_data: Option<HashMap<String, Value>>,
}

/// Decoded delivery event. `event_type` stays an open string so unknown
/// lifecycle stages pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryEvent {
    pub event_type: String,
    pub delivery_id: i64,
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_id: Option<i64>,
    pub tracking_number: Option<String>,
    pub additional_data: HashMap<String, Value>,
}

impl DeliveryEvent {
    pub fn from_slice(payload: &[u8]) -> Result<Self, Error> {
        let payload = serde_json::from_slice::<DeliveryEventPayload>(payload)?;
        Self::try_from(payload)
    }
}

impl TryFrom<DeliveryEventPayload> for DeliveryEvent {
    type Error = Error;

    fn try_from(payload: DeliveryEventPayload) -> Result<Self, Error> {
        let delivery_id = normalize_id(&payload.delivery_id).ok_or_else(|| {
            anyhow!(
                "deliveryId is missing or not an integral identifier: {}",
                payload.delivery_id
            )
        })?;

        let additional_data = payload.additional_data.unwrap_or_default();

        let user_id = match additional_data.get(USER_ID_KEY) {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let normalized = normalize_id(raw);
                if normalized.is_none() {
                    warn!(delivery_id, user_id = %raw, "Ignoring non-integral userId");
                }
                normalized
            }
        };

        let tracking_number = match additional_data.get(TRACKING_NUMBER_KEY) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let timestamp = match payload.timestamp {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let parsed = parse_timestamp(&raw);
                if parsed.is_none() {
                    warn!(delivery_id, timestamp = %raw, "Unrecognized event timestamp");
                }
                parsed
            }
        };

        Ok(Self {
            event_type: payload.event_type,
            delivery_id,
            status: payload.status.unwrap_or_default(),
            timestamp,
            user_id,
            tracking_number,
            additional_data,
        })
    }
}

/// Accepts integers, integral floats and numeric strings.
pub fn normalize_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|v| i64::try_from(v).ok()))
            .or_else(|| n.as_f64().and_then(integral_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_float))
        }
        _ => None,
    }
}

fn integral_float(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_FLOAT_ID {
        Some(value as i64)
    } else {
        None
    }
}

/// RFC 3339, zone-less ISO-8601 (taken as UTC), `[y, m, d, h, mi, s, nanos]`
/// arrays, or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Array(parts) => {
            let parts = parts
                .iter()
                .map(|p| p.as_i64())
                .collect::<Option<Vec<i64>>>()?;
            let part = |i: usize| parts.get(i).copied().unwrap_or(0);

            if parts.len() < 3 {
                return None;
            }

            NaiveDate::from_ymd_opt(
                i32::try_from(part(0)).ok()?,
                u32::try_from(part(1)).ok()?,
                u32::try_from(part(2)).ok()?,
            )?
            .and_hms_nano_opt(
                u32::try_from(part(3)).ok()?,
                u32::try_from(part(4)).ok()?,
                u32::try_from(part(5)).ok()?,
                u32::try_from(part(6)).ok()?,
            )
            .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
