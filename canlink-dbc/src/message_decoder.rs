//! Message Decoding Engine
//!
//! Extracts signal values from raw CAN frames using a document snapshot, and
//! builds payloads from physical values. The document is only ever read, so any
//! number of callers can decode against the same snapshot at once.

use crate::bits;
use crate::config::DecoderConfig;
use crate::signals::database::{DbcDocument, Message, Signal, SignalKey, MAX_PAYLOAD_BYTES};
use crate::types::{CanFrame, DbcError, DecodedEvent, DecodedSignal, Result};
use std::collections::BTreeMap;

/// Upper bound for derived decimal places in formatted values
const MAX_DERIVED_DECIMALS: usize = 9;

/// A payload built from physical values
#[derive(Debug)]
pub struct EncodedFrame {
    /// CAN identifier without the DBC extended flag
    pub can_id: u32,
    pub is_extended: bool,
    pub data: Vec<u8>,
    /// Signals that could not be encoded; their bits stay zero
    pub failures: Vec<SignalFailure>,
}

impl EncodedFrame {
    /// True when every requested signal was encoded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_frame(self) -> CanFrame {
        CanFrame::new(self.can_id, self.data).with_extended(self.is_extended)
    }
}

/// A signal rejected during encoding
#[derive(Debug)]
pub struct SignalFailure {
    pub signal: String,
    pub error: DbcError,
}

/// Message decoder - extracts signals from CAN frames and encodes them back
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode every signal of the message matching `frame`
    ///
    /// Unknown ids are routine on a live bus and yield an empty list.
    pub fn decode_frame(
        frame: &CanFrame,
        document: &DbcDocument,
        config: &DecoderConfig,
    ) -> Vec<DecodedSignal> {
        match document.message_for_frame(frame.can_id, frame.is_extended) {
            Some(message) => Self::decode_signals(&frame.data, message, config),
            None => Vec::new(),
        }
    }

    /// Decode a frame into an event, honouring the message filter
    ///
    /// # Returns
    /// * `Some(DecodedEvent::Message)` for known, unfiltered ids
    /// * `Some(DecodedEvent::RawFrame)` for other frames when raw emission is on
    /// * `None` otherwise
    pub fn decode_event(
        frame: &CanFrame,
        document: &DbcDocument,
        config: &DecoderConfig,
    ) -> Option<DecodedEvent> {
        let message = document
            .message_for_frame(frame.can_id, frame.is_extended)
            .filter(|message| config.should_process_message(message.id));

        match message {
            Some(message) => {
                log::debug!("Decoding message: {} (ID 0x{:X})", message.name, frame.can_id);
                Some(Self::decode_message(frame, message, config))
            }
            None if config.emit_raw_frames => {
                log::trace!("No decodable message for CAN ID 0x{:X}", frame.can_id);
                Some(DecodedEvent::RawFrame {
                    timestamp: frame.timestamp(),
                    can_id: frame.can_id,
                    is_extended: frame.is_extended,
                    data: frame.data.clone(),
                })
            }
            None => {
                log::trace!("Unknown CAN ID: 0x{:X}, dropped", frame.can_id);
                None
            }
        }
    }

    /// Decode a CAN frame into a `DecodedEvent::Message`
    pub fn decode_message(frame: &CanFrame, message: &Message, config: &DecoderConfig) -> DecodedEvent {
        if frame.data.len() < message.length {
            log::debug!(
                "Frame 0x{:X} carries {} bytes, message {} expects {}; missing bits read as zero",
                frame.can_id,
                frame.data.len(),
                message.name,
                message.length
            );
        }

        DecodedEvent::Message {
            timestamp: frame.timestamp(),
            can_id: frame.can_id,
            is_extended: frame.is_extended,
            message_name: message.name.clone(),
            transmitter: message.transmitter().map(String::from),
            signals: Self::decode_signals(&frame.data, message, config),
        }
    }

    fn decode_signals(data: &[u8], message: &Message, config: &DecoderConfig) -> Vec<DecodedSignal> {
        message
            .signals
            .iter()
            .filter_map(|signal| Self::decode_signal(data, message.id, signal, config))
            .collect()
    }

    /// Decode a single signal from CAN frame data
    ///
    /// Signals with a zero factor are skipped.
    pub fn decode_signal(
        data: &[u8],
        message_id: u32,
        signal: &Signal,
        config: &DecoderConfig,
    ) -> Option<DecodedSignal> {
        let Some(value) = bits::decode(data, signal) else {
            log::debug!("Skipping signal '{}' with zero factor", signal.name);
            return None;
        };
        let raw_value = bits::raw_value(data, signal);

        let value_description = signal.value_descriptions.get(&raw_value).cloned();
        let formatted = Self::format_value(signal, value, value_description.as_deref(), config);

        Some(DecodedSignal {
            key: SignalKey::new(message_id, signal.name.clone()),
            value,
            raw_value,
            formatted,
            unit: (!signal.unit.is_empty()).then(|| signal.unit.clone()),
            value_description,
        })
    }

    /// Render a physical value for display
    ///
    /// Uses the value-description label when allowed, otherwise the number with as
    /// many decimals as the factor and offset need, followed by the unit.
    pub fn format_value(
        signal: &Signal,
        value: f64,
        value_description: Option<&str>,
        config: &DecoderConfig,
    ) -> String {
        if let Some(label) = value_description.filter(|_| config.resolve_value_descriptions) {
            return label.to_string();
        }

        let decimals = config
            .float_precision
            .unwrap_or_else(|| decimals_of(signal.factor).max(decimals_of(signal.offset)));
        let number = format!("{:.*}", decimals, value);

        if signal.unit.is_empty() {
            number
        } else {
            format!("{} {}", number, signal.unit)
        }
    }

    /// Build the payload of `message` from physical values keyed by signal name
    ///
    /// Starts from a zero-filled buffer of the message length, capped at
    /// `MAX_PAYLOAD_BYTES`. Signals that fail to encode are reported and leave their
    /// bits at zero; the rest are still encoded.
    pub fn encode_message(message: &Message, values: &BTreeMap<String, f64>) -> EncodedFrame {
        if message.length > MAX_PAYLOAD_BYTES {
            log::warn!(
                "Message {} declares {} bytes, encoding {} bytes",
                message.name,
                message.length,
                MAX_PAYLOAD_BYTES
            );
        }
        let mut data = vec![0u8; message.length.min(MAX_PAYLOAD_BYTES)];
        let mut failures = Vec::new();

        for (name, &value) in values {
            let result = match message.signal(name) {
                Some(signal) => bits::encode_into(&mut data, value, signal).map(|_| ()),
                None => Err(DbcError::SignalNotFound(SignalKey::new(message.id, name.clone()))),
            };

            if let Err(error) = result {
                log::warn!("Failed to encode {} in message {}: {}", name, message.name, error);
                failures.push(SignalFailure {
                    signal: name.clone(),
                    error,
                });
            }
        }

        EncodedFrame {
            can_id: message.raw_id(),
            is_extended: message.is_extended(),
            data,
            failures,
        }
    }

    /// Look up a message by its DBC id and encode it
    pub fn encode_by_id(
        document: &DbcDocument,
        message_id: u32,
        values: &BTreeMap<String, f64>,
    ) -> Result<EncodedFrame> {
        let message = document
            .message(message_id)
            .ok_or(DbcError::MessageNotFound(message_id))?;
        Ok(Self::encode_message(message, values))
    }
}

/// Number of decimals in the shortest exact rendering of `value`
fn decimals_of(value: f64) -> usize {
    if !value.is_finite() {
        return 0;
    }
    let text = value.abs().to_string();
    text.split_once('.')
        .map(|(_, fraction)| fraction.len())
        .unwrap_or(0)
        .min(MAX_DERIVED_DECIMALS)
}
