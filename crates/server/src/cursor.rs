//! Opaque pagination cursors: `base64(JSON {d: ISO timestamp, i: UUID})`.
//!
//! Decoding is strict: any other shape is rejected so a tampered cursor
//! surfaces as a 400 rather than a silent full-table walk.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub d: DateTime<Utc>,
    pub i: Uuid,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Base64,

    #[error("cursor is not valid JSON")]
    Json,

    #[error("cursor field '{0}' is invalid")]
    Field(&'static str),
}

#[derive(Serialize, Deserialize)]
struct Wire {
    d: String,
    i: String,
}

pub fn encode(cursor: &Cursor) -> String {
    let wire = Wire {
        d: cursor.d.to_rfc3339(),
        i: cursor.i.to_string(),
    };
    BASE64.encode(serde_json::to_vec(&wire).unwrap_or_default())
}

pub fn decode(raw: &str) -> Result<Cursor, CursorError> {
    let bytes = BASE64.decode(raw).map_err(|_| CursorError::Base64)?;
    let wire: Wire = serde_json::from_slice(&bytes).map_err(|_| CursorError::Json)?;

    let d = DateTime::parse_from_rfc3339(&wire.d)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| CursorError::Field("d"))?;

    let i = Uuid::parse_str(&wire.i).map_err(|_| CursorError::Field("i"))?;
    // Accept only real UUID versions 1–5.
    if !(1..=5).contains(&i.get_version_num()) {
        return Err(CursorError::Field("i"));
    }

    Ok(Cursor { d, i })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cursor = Cursor { d: Utc::now(), i: Uuid::new_v4() };
        let decoded = decode(&encode(&cursor)).unwrap();
        assert_eq!(decoded.i, cursor.i);
        assert!((decoded.d - cursor.d).num_milliseconds().abs() < 1000);
    }

    #[test]
    fn test_rejects_bad_base64() {
        assert_eq!(decode("!!not-base64!!"), Err(CursorError::Base64));
    }

    #[test]
    fn test_rejects_non_json() {
        let raw = BASE64.encode(b"plain text");
        assert_eq!(decode(&raw), Err(CursorError::Json));
    }

    #[test]
    fn test_rejects_bad_date() {
        let raw = BASE64.encode(
            serde_json::json!({"d": "yesterday", "i": Uuid::new_v4().to_string()}).to_string(),
        );
        assert_eq!(decode(&raw), Err(CursorError::Field("d")));
    }

    #[test]
    fn test_rejects_bad_uuid() {
        let raw = BASE64.encode(
            serde_json::json!({"d": Utc::now().to_rfc3339(), "i": "1234"}).to_string(),
        );
        assert_eq!(decode(&raw), Err(CursorError::Field("i")));
    }

    #[test]
    fn test_rejects_nil_uuid() {
        // The nil UUID is version 0 — not a v1–v5 identifier.
        let raw = BASE64.encode(
            serde_json::json!({"d": Utc::now().to_rfc3339(), "i": Uuid::nil().to_string()})
                .to_string(),
        );
        assert_eq!(decode(&raw), Err(CursorError::Field("i")));
    }

    #[test]
    fn test_rejects_extra_shape() {
        let raw = BASE64.encode(serde_json::json!(["d", "i"]).to_string());
        assert_eq!(decode(&raw), Err(CursorError::Json));
    }
}
