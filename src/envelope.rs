//! Event envelope and its CloudEvents wire codec.
//!
//! Both transports speak CloudEvents 1.0:
//! - *binary* mode: context attributes travel as `ce-*` headers, the body is the data
//! - *structured* mode: the whole event is one JSON document
//!   (`application/cloudevents+json`)
//!
//! Parsing only checks that the attributes the pipeline needs are present.
//! Whether the envelope is addressed to this receiver is the validator's call.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::error::EnvelopeError;

/// Event type announcing that a new file is ready for processing.
pub const NEW_FILE_EVENT_TYPE: &str = "io.jaconi.prepper.file.new";

/// Prefix of every source identity; the node name is appended.
pub const SOURCE_PREFIX: &str = "jaconi.io/prepper";

/// The only CloudEvents spec version this receiver was written against.
pub const SPEC_VERSION: &str = "1.0";

/// Media type marking a structured-mode event.
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// A received event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    event_type: String,
    source: String,
    payload: Vec<u8>,
    id: Option<String>,
    time: Option<DateTime<Utc>>,
    data_content_type: Option<String>,
}

impl Envelope {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            payload: payload.into(),
            id: None,
            time: None,
            data_content_type: None,
        }
    }

    /// Media type of the payload, e.g. `application/json`.
    pub fn with_data_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.data_content_type = Some(content_type.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    /// Build an envelope from binary-mode context attributes.
    ///
    /// `attribute` looks up a context attribute by its bare name (`type`,
    /// `source`, ...); the transport decides where it lives (e.g. `ce-type`).
    pub fn from_binary<F>(
        attribute: F,
        content_type: Option<&str>,
        body: impl Into<Vec<u8>>,
    ) -> Result<Self, EnvelopeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        check_spec_version(attribute("specversion").as_deref());

        let event_type = attribute("type").ok_or(EnvelopeError::MissingAttribute("type"))?;
        let source = attribute("source").ok_or(EnvelopeError::MissingAttribute("source"))?;

        let mut envelope = Self::new(event_type, source, body);
        envelope.id = attribute("id");
        envelope.time = attribute("time").as_deref().map(parse_time).transpose()?;

        Ok(match content_type {
            Some(content_type) => envelope.with_data_content_type(content_type),
            None => envelope,
        })
    }

    /// Build an envelope from a structured-mode JSON document.
    ///
    /// Inline JSON `data` is re-serialized to bytes. A JSON string is taken as
    /// raw text only when `datacontenttype` names a non-JSON media type;
    /// otherwise it stays a JSON string. `data_base64` carries binary data.
    pub fn from_structured(json: &[u8]) -> Result<Self, EnvelopeError> {
        let event: StructuredEvent = serde_json::from_slice(json)?;

        check_spec_version(event.specversion.as_deref());

        let event_type = event
            .event_type
            .ok_or(EnvelopeError::MissingAttribute("type"))?;
        let source = event.source.ok_or(EnvelopeError::MissingAttribute("source"))?;

        let payload = match (event.data, event.data_base64) {
            (Some(_), Some(_)) => {
                return Err(EnvelopeError::InvalidAttribute {
                    name: "data",
                    reason: "data and data_base64 are mutually exclusive".to_string(),
                });
            }
            (_, Some(encoded)) => {
                BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| EnvelopeError::InvalidAttribute {
                        name: "data_base64",
                        reason: e.to_string(),
                    })?
            }
            (Some(serde_json::Value::String(text)), None)
                if !event.datacontenttype.as_deref().is_none_or(is_json_content_type) =>
            {
                text.into_bytes()
            }
            (Some(serde_json::Value::Null), None) | (None, None) => Vec::new(),
            (Some(value), None) => serde_json::to_vec(&value)?,
        };

        let mut envelope = Self::new(event_type, source, payload);
        envelope.id = event.id;
        envelope.time = event.time.as_deref().map(parse_time).transpose()?;

        Ok(match event.datacontenttype {
            Some(content_type) => envelope.with_data_content_type(content_type),
            None => envelope,
        })
    }
}

/// Whether a `Content-Type` value announces a structured-mode event.
pub fn is_structured_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(STRUCTURED_CONTENT_TYPE))
}

/// Whether a media type carries JSON (`application/json`, `text/json`, `*+json`).
pub fn is_json_content_type(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media == "application/json" || media == "text/json" || media.ends_with("+json")
}

#[derive(Debug, Deserialize)]
struct StructuredEvent {
    specversion: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    source: Option<String>,
    id: Option<String>,
    time: Option<String>,
    datacontenttype: Option<String>,
    data: Option<serde_json::Value>,
    data_base64: Option<String>,
}

fn check_spec_version(version: Option<&str>) {
    if version != Some(SPEC_VERSION) {
        warn!(
            expected = SPEC_VERSION,
            actual = version.unwrap_or("<none>"),
            "Unexpected CloudEvents spec version, accepting anyway"
        );
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, EnvelopeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EnvelopeError::InvalidAttribute {
            name: "time",
            reason: e.to_string(),
        })
}
