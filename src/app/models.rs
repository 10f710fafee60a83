//! Data models for evalstream
//!
//! This module defines the core data structures shared by the pipeline
//! components: decoded wire events, submitted batch items, the request body
//! sent to the scoring service, and the per-item result records kept by the
//! reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::wire;
use crate::errors::{PayloadError, PipelineError, PipelineResult};

/// Kind of a decoded wire event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Per-item result (the default when a frame names no event)
    Result,
    /// Batch-level summary metadata
    Summary,
    /// Server-signaled error
    Error,
    /// End of batch
    End,
    /// Carries no business data
    Keepalive,
}

impl EventKind {
    /// Map an `event:` name to a kind
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "result" | "message" => Some(Self::Result),
            "summary" => Some(Self::Summary),
            "error" => Some(Self::Error),
            "end" | "complete" => Some(Self::End),
            "keepalive" | "ping" => Some(Self::Keepalive),
            _ => None,
        }
    }

    /// Map an envelope `type` discriminator to a kind
    pub fn from_envelope_type(name: &str) -> Option<Self> {
        match name {
            "result" => Some(Self::Result),
            "summary" => Some(Self::Summary),
            "error" => Some(Self::Error),
            "complete" | "end" => Some(Self::End),
            "keepalive" => Some(Self::Keepalive),
            _ => None,
        }
    }

    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Result => "result",
            Self::Summary => "summary",
            Self::Error => "error",
            Self::End => "end",
            Self::Keepalive => "keepalive",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded unit from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub kind: EventKind,
    pub payload: Value,
}

impl WireEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Event with an empty object payload, used for bodiless named frames
    pub fn placeholder(kind: EventKind) -> Self {
        Self::new(kind, Value::Object(Map::new()))
    }

    pub fn result(payload: Value) -> Self {
        Self::new(EventKind::Result, payload)
    }

    pub fn keepalive() -> Self {
        Self::placeholder(EventKind::Keepalive)
    }

    /// Route a default-kind data payload through the known envelope forms
    ///
    /// `{"type": "result", "data": D}` becomes a result carrying `D`,
    /// `{"type": "keepalive"}` a keepalive, and likewise for `summary`,
    /// `error` and `complete`/`end`. Anything else is a flat result.
    pub fn from_default_data(payload: Value) -> Self {
        let envelope_kind = payload
            .get(wire::TYPE_FIELD)
            .and_then(Value::as_str)
            .and_then(EventKind::from_envelope_type);

        match envelope_kind {
            Some(kind) => {
                let body = match payload {
                    Value::Object(mut map) => map
                        .remove(wire::DATA_FIELD)
                        .unwrap_or_else(|| Value::Object(Map::new())),
                    other => other,
                };
                Self::new(kind, body)
            }
            None => Self::result(payload),
        }
    }

    /// Human-readable error text carried by an error payload
    pub fn error_message(&self) -> String {
        wire::ERROR_MESSAGE_FIELDS
            .iter()
            .find_map(|field| self.payload.get(*field).and_then(Value::as_str))
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(wire::UNKNOWN_SERVER_ERROR)
            .to_string()
    }

    /// Item an error payload is scoped to, if it names one
    pub fn error_scope(&self) -> Option<String> {
        wire::ERROR_SCOPE_FIELDS
            .iter()
            .find_map(|field| self.payload.get(*field).and_then(id_to_string))
    }
}

/// One item submitted for scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Stable key used to reconcile streamed results
    pub id: String,
    /// Remaining fields, passed through untouched
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BatchItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Attach a pass-through field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Build an item from an arbitrary JSON object, reading its id with
    /// the same precedence used for streamed results
    pub fn from_value(value: Value) -> PipelineResult<Self> {
        let id = extract_item_id(&value).ok_or_else(|| PipelineError::InvalidBatch {
            reason: "item has no id or conversation_id field".to_string(),
        })?;
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(PipelineError::InvalidBatch {
                    reason: format!("item must be an object, found {}", value_type_name(&other)),
                })
            }
        };
        fields.remove("id");
        Ok(Self { id, fields })
    }
}

/// Body of `POST /evaluate/batch/stream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    pub group_key: String,
    pub max_concurrency: u32,
}

/// Processing status of one submitted item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Completed,
    Failed,
}

impl RecordStatus {
    /// Completed and failed are final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Where a record's key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Seeded from the submitted batch
    Submitted,
    /// First seen in the stream under an id that was never submitted
    Unsolicited,
    /// Result carried no id; key is a synthetic fallback
    Synthetic,
}

/// Outcome for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub item_id: String,
    pub status: RecordStatus,
    /// Scoring data, merged across deliveries
    pub payload: Map<String, Value>,
    /// Time of the latest update (creation time while pending)
    pub received_at: DateTime<Utc>,
    pub origin: RecordOrigin,
    /// Number of result events merged into this record
    pub deliveries: u32,
    /// Server error text for failed records
    pub error: Option<String>,
}

impl ResultRecord {
    /// Pending record for a submitted item
    pub fn pending(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            status: RecordStatus::Pending,
            payload: Map::new(),
            received_at: Utc::now(),
            origin: RecordOrigin::Submitted,
            deliveries: 0,
            error: None,
        }
    }

    /// Shallow merge: new top-level fields win, absent ones are kept
    pub fn merge_payload(&mut self, update: Map<String, Value>) {
        for (key, value) in update {
            self.payload.insert(key, value);
        }
    }

    /// Scoring status reported by the service (`ok` / `error`), if any
    pub fn scoring_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Whether this record belongs to the submitted batch
    pub fn is_submitted(&self) -> bool {
        self.origin == RecordOrigin::Submitted
    }
}

/// Decoded result payload
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    /// Identifier found in the payload, if any
    pub item_id: Option<String>,
    /// Fields to merge into the record
    pub fields: Map<String, Value>,
}

impl ResultPayload {
    /// Decode a result payload from one of the known shapes
    ///
    /// Accepted shapes are a flat object, or an object nesting the result
    /// under `data` or `result`. In every case the top-level object is what
    /// gets merged; only the id lookup descends into the nested objects.
    pub fn decode(payload: Value) -> Result<Self, PayloadError> {
        let item_id = extract_item_id(&payload);
        match payload {
            Value::Object(fields) => {
                if let Some(nested) = fields.get(wire::DATA_FIELD) {
                    if !(nested.is_object() || nested.is_null()) && item_id.is_none() {
                        return Err(PayloadError::MalformedEnvelope {
                            reason: format!(
                                "`data` must be an object, found {}",
                                value_type_name(nested)
                            ),
                        });
                    }
                }
                Ok(Self { item_id, fields })
            }
            other => Err(PayloadError::NotAnObject {
                found: value_type_name(&other).to_string(),
            }),
        }
    }
}

/// Find an item id: top-level `id` / `conversation_id`, then the same
/// fields under `data`, then under `result`
pub fn extract_item_id(payload: &Value) -> Option<String> {
    let direct = |value: &Value| {
        wire::ID_FIELDS
            .iter()
            .find_map(|field| value.get(*field).and_then(id_to_string))
    };

    direct(payload).or_else(|| {
        wire::NESTED_ID_CONTAINERS
            .iter()
            .filter_map(|container| payload.get(*container))
            .find_map(direct)
    })
}

/// Ids may be strings or integers on the wire
fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// JSON type name for diagnostics
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
