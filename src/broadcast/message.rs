//! Outbound wire message schema (§6): a snapshot message or a diff message,
//! each carrying the Store sequence it was computed from. Encoding (JSON vs
//! the compact binary frame) happens at the edge so both carry identical
//! logical content, per the spec's requirement.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::broadcast::diff::Changes;
use crate::gateway::wire;
use crate::models::Encoding;

pub enum Outbound {
    Snapshot { seq: u64, timestamp: DateTime<Utc>, data: Value },
    Diff { seq: u64, timestamp: DateTime<Utc>, changes: Changes },
}

impl Outbound {
    pub fn encode(&self, encoding: Encoding) -> Message {
        match encoding {
            Encoding::TextJson => Message::Text(self.to_json().to_string()),
            Encoding::CompactBinary => Message::Binary(self.to_binary()),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Outbound::Snapshot { seq, timestamp, data } => serde_json::json!({
                "type": "snapshot",
                "seq": seq,
                "timestamp": timestamp,
                "data": data,
            }),
            Outbound::Diff { seq, timestamp, changes } => {
                let changes_obj: serde_json::Map<String, Value> =
                    changes.iter().cloned().collect();
                serde_json::json!({
                    "type": "update",
                    "seq": seq,
                    "timestamp": timestamp,
                    "changes": changes_obj,
                })
            }
        }
    }

    fn to_binary(&self) -> Vec<u8> {
        match self {
            Outbound::Snapshot { seq, timestamp, data } => {
                wire::encode_frame(wire::MessageKind::Snapshot, *seq, *timestamp, data)
            }
            Outbound::Diff { seq, timestamp, changes } => {
                let changes_obj: serde_json::Map<String, Value> =
                    changes.iter().cloned().collect();
                wire::encode_frame(
                    wire::MessageKind::Update,
                    *seq,
                    *timestamp,
                    &Value::Object(changes_obj),
                )
            }
        }
    }
}
