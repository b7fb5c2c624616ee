use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::CACHE_SCHEMA_VERSION;

/// Heartbeat message as it travels over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Address of the reporting host
    pub ip: String,

    /// Observation time in epoch milliseconds
    pub time: i64,

    /// How long the host has been reachable, in seconds
    pub duration: i64,
}

/// Body accepted by the HTTP heartbeat intake. The server stamps `time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub ip: String,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

impl HeartbeatRequest {
    /// Transport message observed at `now_millis`
    pub fn into_message(self, now_millis: i64) -> HeartbeatMessage {
        HeartbeatMessage {
            ip: self.ip,
            time: now_millis,
            duration: self.duration,
        }
    }
}

/// Reply from the HTTP heartbeat intake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeResponse {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed heartbeat payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("heartbeat has an empty address")]
    EmptyAddress,
}

/// One decoded liveness signal. Consumed once by a signal processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub address: String,
    pub observed_at_millis: i64,
    pub duration_seconds: i64,
}

impl Signal {
    /// Decode a raw transport payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let message: HeartbeatMessage = serde_json::from_slice(payload)?;
        Signal::try_from(message)
    }
}

impl TryFrom<HeartbeatMessage> for Signal {
    type Error = DecodeError;

    fn try_from(message: HeartbeatMessage) -> Result<Self, Self::Error> {
        let address = message.ip.trim();
        if address.is_empty() {
            return Err(DecodeError::EmptyAddress);
        }
        Ok(Signal {
            address: address.to_string(),
            observed_at_millis: message.time,
            duration_seconds: message.duration,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Up,
    Down,
}

impl ServerStatus {
    /// Integer form used by the status column
    pub fn as_i64(self) -> i64 {
        match self {
            ServerStatus::Up => 1,
            ServerStatus::Down => 0,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value != 0 {
            ServerStatus::Up
        } else {
            ServerStatus::Down
        }
    }
}

/// A monitored server as registered in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Store-assigned identifier
    pub id: i64,

    /// Display name; defaults to the address on creation
    pub name: String,

    /// Reporting address, unique across records
    pub address: String,

    pub status: ServerStatus,

    pub created_at: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,
}

/// Versioned envelope for a server record held in the fast-path cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRecord {
    pub v: u32,
    pub record: ServerRecord,
}

impl CachedRecord {
    pub fn encode(record: &ServerRecord) -> serde_json::Result<String> {
        serde_json::to_string(&CachedRecord {
            v: CACHE_SCHEMA_VERSION,
            record: record.clone(),
        })
    }

    /// Decode a cached value. Returns None for undecodable JSON or a
    /// different schema version.
    pub fn decode(value: &str) -> Option<ServerRecord> {
        let cached: CachedRecord = serde_json::from_str(value).ok()?;
        (cached.v == CACHE_SCHEMA_VERSION).then_some(cached.record)
    }
}

/// Write-once archival document: the resolved record plus signal metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDocument {
    pub server: ServerRecord,
    pub observed_at_millis: i64,
    pub duration_seconds: i64,
}

impl ArchiveDocument {
    pub fn new(server: ServerRecord, signal: &Signal) -> Self {
        Self {
            server,
            observed_at_millis: signal.observed_at_millis,
            duration_seconds: signal.duration_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record() -> ServerRecord {
        ServerRecord {
            id: 7,
            name: "10.0.0.5".to_string(),
            address: "10.0.0.5".to_string(),
            status: ServerStatus::Up,
            created_at: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_decode_heartbeat() {
        let payload = br#"{"ip":"10.0.0.5","time":1700000000000,"duration":15}"#;
        let signal = Signal::decode(payload).unwrap();
        assert_eq!(signal.address, "10.0.0.5");
        assert_eq!(signal.observed_at_millis, 1_700_000_000_000);
        assert_eq!(signal.duration_seconds, 15);
    }

    #[test]
    fn test_request_time_is_replaced_by_server_time() {
        let request: HeartbeatRequest =
            serde_json::from_str(r#"{"ip":"10.0.0.5","duration":15,"time":42}"#).unwrap();
        let message = request.into_message(1_700_000_000_000);
        assert_eq!(message.time, 1_700_000_000_000);
        assert_eq!(message.duration, 15);

        let bare: HeartbeatRequest = serde_json::from_str(r#"{"ip":"10.0.0.5","duration":15}"#).unwrap();
        assert_eq!(bare.time, None);
        assert!(!serde_json::to_string(&bare).unwrap().contains("time"));
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(matches!(Signal::decode(b"not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            Signal::decode(br#"{"ip":"10.0.0.5","time":"soon","duration":15}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Signal::decode(br#"{"ip":"  ","time":1,"duration":15}"#),
            Err(DecodeError::EmptyAddress)
        ));
    }

    #[test]
    fn test_cached_record_version_mismatch_is_miss() {
        let record = test_record();
        let encoded = CachedRecord::encode(&record).unwrap();
        assert_eq!(CachedRecord::decode(&encoded), Some(record.clone()));

        let stale = serde_json::json!({ "v": CACHE_SCHEMA_VERSION + 1, "record": record });
        assert_eq!(CachedRecord::decode(&stale.to_string()), None);
        assert_eq!(CachedRecord::decode("{\"ID\":\"1\"}"), None);
    }

    #[test]
    fn test_status_column_encoding() {
        assert_eq!(ServerStatus::from_i64(ServerStatus::Up.as_i64()), ServerStatus::Up);
        assert_eq!(ServerStatus::from_i64(ServerStatus::Down.as_i64()), ServerStatus::Down);
        assert_eq!(
            serde_json::to_string(&ServerStatus::Down).unwrap(),
            "\"down\""
        );
    }
}
