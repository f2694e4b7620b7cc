use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Decoded record value: structured JSON when the bytes parse, otherwise the raw text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(serde_json::Value),
    Raw(String),
}

impl Payload {
    /// Best-effort decode. Invalid JSON is not an error: the text is kept as-is.
    pub fn decode(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(text.into_owned()),
        }
    }

    /// Serialize to JSON text. `Raw` becomes a JSON string literal.
    pub fn to_json_text(&self) -> Result<String, serde_json::Error> {
        match self {
            Payload::Json(value) => serde_json::to_string(value),
            Payload::Raw(text) => serde_json::to_string(text),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Payload::Json(_) => None,
            Payload::Raw(text) => Some(text),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Raw(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Raw(text.to_string())
    }
}

/// Header values are opaque bytes.
pub type Headers = BTreeMap<String, Vec<u8>>;

/// Application-level message, decoupled from the broker wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "headers_as_text"
    )]
    pub headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Event {
    pub fn new(value: impl Into<Payload>) -> Self {
        Self {
            key: None,
            value: value.into(),
            partition: None,
            headers: None,
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// Renders header bytes as lossy UTF-8 so logged events stay readable.
fn headers_as_text<S: Serializer>(headers: &Option<Headers>, s: S) -> Result<S::Ok, S::Error> {
    match headers {
        Some(map) => {
            let text: BTreeMap<&str, String> = map
                .iter()
                .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v).into_owned()))
                .collect();
            text.serialize(s)
        }
        None => s.serialize_none(),
    }
}

/// The unit exchanged over an observer bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicMessage {
    pub topic: String,
    pub message: Event,
}

impl TopicMessage {
    pub fn new(topic: impl Into<String>, message: Event) -> Self {
        Self { topic: topic.into(), message }
    }
}
