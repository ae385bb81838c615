//! Core types for the DBC engine
//!
//! Frames going in, decoded signals and events coming out, and the error type
//! shared by the whole crate. Malformed DBC text never produces an error; the
//! variants below cover I/O, lookups and contract violations.

use crate::signals::database::SignalKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type used throughout the engine
pub type Timestamp = DateTime<Utc>;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, DbcError>;

/// A CAN frame as delivered by the transport layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanFrame {
    /// Timestamp in nanoseconds since epoch (0 when unknown)
    #[serde(default)]
    pub timestamp_ns: u64,
    /// CAN identifier without any flag bits (11-bit or 29-bit)
    pub can_id: u32,
    /// True if this is an extended (29-bit) CAN ID
    #[serde(default)]
    pub is_extended: bool,
    /// Frame data bytes (0-8 bytes for classic CAN)
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp_ns: 0,
            can_id,
            is_extended: false,
            data: data.into(),
        }
    }

    pub fn with_extended(mut self, is_extended: bool) -> Self {
        self.is_extended = is_extended;
        self
    }

    pub fn with_timestamp_ns(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Convert timestamp from nanoseconds to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        let secs = (self.timestamp_ns / 1_000_000_000) as i64;
        let nsecs = (self.timestamp_ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_default()
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Errors that can occur in the engine
#[derive(Debug, thiserror::Error)]
pub enum DbcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message not found: CAN ID 0x{0:X}")]
    MessageNotFound(u32),

    #[error("Signal not found: {0}")]
    SignalNotFound(SignalKey),

    #[error("Message 0x{0:X} already exists")]
    DuplicateMessage(u32),

    #[error("Signal {0} already exists")]
    DuplicateSignal(SignalKey),

    #[error("Invalid scaling for signal '{signal}': factor is zero")]
    InvalidScaling { signal: String },

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),

    #[error("Invalid value {value} for signal '{signal}'")]
    InvalidValue { signal: String, value: f64 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

/// A decoded signal with its current value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSignal {
    /// Identity of the signal in the active document
    pub key: SignalKey,
    /// Physical value after factor and offset
    pub value: f64,
    /// Raw value before scaling, sign-extended for signed signals
    pub raw_value: i64,
    /// Human-readable rendering (value label, or number with unit)
    pub formatted: String,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Label from the signal's value descriptions, if the raw value has one
    pub value_description: Option<String>,
}

impl DecodedSignal {
    pub fn name(&self) -> &str {
        &self.key.signal_name
    }
}

/// Main decoded event type emitted per frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodedEvent {
    /// A frame matched to a message definition
    Message {
        timestamp: Timestamp,
        can_id: u32,
        is_extended: bool,
        message_name: String,
        /// Sender node (if the document names one)
        transmitter: Option<String>,
        signals: Vec<DecodedSignal>,
    },

    /// A frame with no matching (or a filtered) message definition
    RawFrame {
        timestamp: Timestamp,
        can_id: u32,
        is_extended: bool,
        data: Vec<u8>,
    },
}

impl DecodedEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DecodedEvent::Message { timestamp, .. } => *timestamp,
            DecodedEvent::RawFrame { timestamp, .. } => *timestamp,
        }
    }

    pub fn can_id(&self) -> u32 {
        match self {
            DecodedEvent::Message { can_id, .. } => *can_id,
            DecodedEvent::RawFrame { can_id, .. } => *can_id,
        }
    }

    /// Decoded signals, empty for raw frames
    pub fn signals(&self) -> &[DecodedSignal] {
        match self {
            DecodedEvent::Message { signals, .. } => signals,
            DecodedEvent::RawFrame { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamp() {
        let frame = CanFrame::new(0x100, vec![1, 2, 3]).with_timestamp_ns(1_500_000_000);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.timestamp().timestamp(), 1);
        assert_eq!(frame.timestamp().timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_error_display() {
        let err = DbcError::MessageNotFound(0x999);
        assert_eq!(err.to_string(), "Message not found: CAN ID 0x999");

        let err = DbcError::SignalNotFound(SignalKey::new(0x10, "Speed"));
        assert_eq!(err.to_string(), "Signal not found: 0x10.Speed");
    }

    #[test]
    fn test_raw_event_has_no_signals() {
        let event = DecodedEvent::RawFrame {
            timestamp: Timestamp::default(),
            can_id: 0x42,
            is_extended: false,
            data: vec![],
        };
        assert_eq!(event.can_id(), 0x42);
        assert!(event.signals().is_empty());
    }
}
