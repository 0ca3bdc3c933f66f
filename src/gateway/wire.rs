//! Compact binary wire framing for fast clients (§6).
//!
//! Unlike the fixed 76-byte tick format this is adapted from, a snapshot or
//! diff payload is variable length (a dotted-path diff can carry anywhere
//! from one to hundreds of entries), so the payload itself stays a compact
//! JSON blob behind a fixed header rather than a `#[repr(C, packed)]`
//! struct. The header layout, the magic/version/checksum discipline, and
//! the CRC32 implementation are carried over unchanged.
//!
//! ```text
//! Offset  Size  Field
//! 0       2     magic (0xA66B)
//! 2       1     version
//! 3       1     message kind (0 = snapshot, 1 = update)
//! 4       8     seq
//! 12      8     timestamp_ms (epoch millis, UTC)
//! 20      4     payload_len
//! 24      N     payload (JSON-encoded data/changes object)
//! 24+N    4     checksum (CRC32 over everything before it)
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;

pub const MAGIC: u16 = 0xA66B;
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Snapshot = 0,
    Update = 1,
}

impl MessageKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageKind::Snapshot),
            1 => Some(MessageKind::Update),
            _ => None,
        }
    }
}

pub struct DecodedFrame {
    pub kind: MessageKind,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

pub fn encode_frame(kind: MessageKind, seq: u64, timestamp: DateTime<Utc>, payload: &Value) -> Vec<u8> {
    let payload_bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut buf = Vec::with_capacity(HEADER_LEN + payload_bytes.len() + 4);

    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.push(VERSION);
    buf.push(kind as u8);
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(&timestamp.timestamp_millis().to_le_bytes());
    buf.extend_from_slice(&(payload_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload_bytes);

    let checksum = crc32_fast(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

pub fn decode_frame(buf: &[u8]) -> Result<DecodedFrame, WireError> {
    if buf.len() < HEADER_LEN + 4 {
        return Err(WireError::InvalidSize(buf.len()));
    }

    let body_len = buf.len() - 4;
    let checksum = u32::from_le_bytes(buf[body_len..].try_into().unwrap());
    if crc32_fast(&buf[..body_len]) != checksum {
        return Err(WireError::ChecksumMismatch);
    }

    let magic = u16::from_le_bytes(buf[0..2].try_into().unwrap());
    if magic != MAGIC {
        return Err(WireError::InvalidMagic(magic));
    }
    let version = buf[2];
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let kind = MessageKind::from_u8(buf[3]).ok_or(WireError::InvalidKind(buf[3]))?;
    let seq = u64::from_le_bytes(buf[4..12].try_into().unwrap());
    let timestamp_ms = i64::from_le_bytes(buf[12..20].try_into().unwrap());
    let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or(WireError::InvalidTimestamp)?;
    let payload_len = u32::from_le_bytes(buf[20..24].try_into().unwrap()) as usize;

    if HEADER_LEN + payload_len != body_len {
        return Err(WireError::InvalidSize(buf.len()));
    }
    let payload: Value = serde_json::from_slice(&buf[HEADER_LEN..HEADER_LEN + payload_len])
        .map_err(|_| WireError::InvalidPayload)?;

    Ok(DecodedFrame { kind, seq, timestamp, payload })
}

#[derive(Debug, Clone)]
pub enum WireError {
    InvalidSize(usize),
    InvalidMagic(u16),
    UnsupportedVersion(u8),
    InvalidKind(u8),
    InvalidTimestamp,
    InvalidPayload,
    ChecksumMismatch,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSize(s) => write!(f, "invalid frame size: {s}"),
            Self::InvalidMagic(m) => write!(f, "invalid magic: 0x{m:04X} (expected 0x{MAGIC:04X})"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version: {v} (expected {VERSION})"),
            Self::InvalidKind(k) => write!(f, "invalid message kind: {k}"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidPayload => write!(f, "invalid payload json"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
        }
    }
}

impl std::error::Error for WireError {}

fn crc32_fast(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = generate_crc32_table();

    let mut crc = 0xFFFFFFFF_u32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = CRC32_TABLE[idx] ^ (crc >> 8);
    }
    !crc
}

const fn generate_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = 0xEDB88320 ^ (crc >> 1);
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let payload = serde_json::json!({"market_data": {"BTCUSDT": {"last_price": 50000.0}}});
        let ts = Utc::now();
        let bytes = encode_frame(MessageKind::Snapshot, 42, ts, &payload);

        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.kind, MessageKind::Snapshot);
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn update_roundtrip_with_large_payload() {
        let mut obj = serde_json::Map::new();
        for i in 0..200 {
            obj.insert(format!("orders.o{i}.status"), serde_json::json!("filled"));
        }
        let payload = Value::Object(obj);
        let bytes = encode_frame(MessageKind::Update, 7, Utc::now(), &payload);
        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.kind, MessageKind::Update);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn checksum_detects_corruption() {
        let payload = serde_json::json!({"a": 1});
        let mut bytes = encode_frame(MessageKind::Snapshot, 1, Utc::now(), &payload);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(decode_frame(&bytes), Err(WireError::ChecksumMismatch)));
    }

    #[test]
    fn rejects_bad_magic() {
        let payload = serde_json::json!({});
        let mut bytes = encode_frame(MessageKind::Snapshot, 1, Utc::now(), &payload);
        bytes[0] ^= 0xFF;
        let err = decode_frame(&bytes).unwrap_err();
        assert!(matches!(err, WireError::InvalidMagic(_) | WireError::ChecksumMismatch));
    }
}
