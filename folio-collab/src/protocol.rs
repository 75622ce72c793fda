//! Binary protocol spoken between a document session and the sync server.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ doc_id   │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes  │ varint+N │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Handshake: the client sends `SyncStep1` with its state vector, the server
//! answers `SyncStep2` with the diff the client is missing. After that both
//! sides exchange `Delta` updates. `SyncAck` reports how many client updates
//! the server has not yet integrated; `AuthFailed` rejects the session.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Yrs state vector for initial sync handshake
    SyncStep1 = 1,
    /// Yrs state diff response
    SyncStep2 = 2,
    /// Incremental CRDT update
    Delta = 3,
    /// Presence states of every connected client
    Awareness = 4,
    /// Server acknowledgment with outstanding-update count
    SyncAck = 5,
    /// Server rejected the session's credentials
    AuthFailed = 6,
}

/// One client's entry in an awareness broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessState {
    /// Transport-level client id (one per tab/connection).
    pub client_id: String,
    pub name: String,
    pub email: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub last_active: u64,
}

impl AwarenessState {
    pub fn new(client_id: impl Into<String>, name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            email,
            last_active: 0,
        }
    }

    pub fn with_last_active(mut self, last_active: u64) -> Self {
        self.last_active = last_active;
        self
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub doc_id: String,
    /// Lamport clock for causal ordering
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, doc_id: &str, clock: u64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            doc_id: doc_id.to_string(),
            clock,
            payload,
        }
    }

    pub fn delta(peer_id: Uuid, doc_id: &str, clock: u64, yrs_update: Vec<u8>) -> Self {
        Self::new(MessageType::Delta, peer_id, doc_id, clock, yrs_update)
    }

    pub fn sync_step1(peer_id: Uuid, doc_id: &str, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, peer_id, doc_id, 0, state_vector)
    }

    pub fn sync_step2(peer_id: Uuid, doc_id: &str, state_diff: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, peer_id, doc_id, 0, state_diff)
    }

    pub fn awareness(peer_id: Uuid, doc_id: &str, clock: u64, states: &[AwarenessState]) -> Result<Self, ProtocolError> {
        let payload = encode_payload(&states)?;
        Ok(Self::new(MessageType::Awareness, peer_id, doc_id, clock, payload))
    }

    pub fn sync_ack(peer_id: Uuid, doc_id: &str, unsynced: u64) -> Result<Self, ProtocolError> {
        let payload = encode_payload(&unsynced)?;
        Ok(Self::new(MessageType::SyncAck, peer_id, doc_id, 0, payload))
    }

    pub fn auth_failed(peer_id: Uuid, doc_id: &str, reason: &str) -> Result<Self, ProtocolError> {
        let payload = encode_payload(&reason)?;
        Ok(Self::new(MessageType::AuthFailed, peer_id, doc_id, 0, payload))
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_payload(bytes)
    }

    pub fn awareness_states(&self) -> Result<Vec<AwarenessState>, ProtocolError> {
        self.expect_type(MessageType::Awareness)?;
        decode_payload(&self.payload)
    }

    /// Number of client updates the server has not integrated yet.
    pub fn unsynced(&self) -> Result<u64, ProtocolError> {
        self.expect_type(MessageType::SyncAck)?;
        decode_payload(&self.payload)
    }

    pub fn auth_reason(&self) -> Result<String, ProtocolError> {
        self.expect_type(MessageType::AuthFailed)?;
        decode_payload(&self.payload)
    }

    fn expect_type(&self, expected: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type == expected {
            Ok(())
        } else {
            Err(ProtocolError::InvalidMessageType)
        }
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type")]
    InvalidMessageType,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}
