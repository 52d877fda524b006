//! Raw clickstream events: the record shape shared by the generator and loader.

pub mod generate;
pub mod load;

use serde::{Deserialize, Serialize};

pub use self::generate::{generate_artifact, GeneratorConfig, GeneratorRequest};
pub use self::load::{load_artifact, EventSink, LoadError, LoadSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    AddToCart,
    Purchase,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::AddToCart => "add_to_cart",
            EventType::Purchase => "purchase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Ios,
    Android,
    Web,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Ios => "ios",
            DeviceType::Android => "android",
            DeviceType::Web => "web",
        }
    }
}

/// One line of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub user_id: i64,
    pub event_type: EventType,
    pub event_ts: chrono::DateTime<chrono::Utc>,
    pub device_type: DeviceType,
    /// Only set on purchases.
    pub price: Option<f64>,
    pub currency: String,
    pub source_version: String,
    pub geo_country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

/// Encode events as newline-delimited JSON, trailing newline included.
pub fn to_jsonl(events: &[Event]) -> serde_json::Result<String> {
    let mut body = String::new();
    for event in events {
        body.push_str(&serde_json::to_string(event)?);
        body.push('\n');
    }
    Ok(body)
}
