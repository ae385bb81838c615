//! Document edit and transmit commands
//!
//! Commands arrive as JSON objects whose `"type"` field selects the variant, for
//! example from a scripting layer or an assistant. Decoding goes through a table
//! from discriminator to payload decoder.
//!
//! Edits never mutate the input document. Each command runs against a working
//! copy; a failing command leaves that copy untouched and later commands still run.

use crate::message_decoder::{EncodedFrame, MessageDecoder};
use crate::signals::database::{
    ByteOrder, DbcDocument, Message, Signal, SignalKey, ValueType, NO_NODE,
};
pub use crate::signals::database::MAX_PAYLOAD_BYTES;
use crate::types::{DbcError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const MAX_STANDARD_ID: u32 = 0x7FF;
const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMessage {
    pub id: u32,
    pub name: String,
    pub length: usize,
    #[serde(default)]
    pub transmitter: String,
    #[serde(default)]
    pub description: String,
}

/// Fields left out are kept as they are
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub id: u32,
    pub name: Option<String>,
    pub length: Option<usize>,
    pub transmitter: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSignal {
    pub message_id: u32,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSignal {
    pub message_id: u32,
    pub name: String,
    #[serde(default)]
    pub changes: SignalChanges,
}

/// Partial signal update; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalChanges {
    pub name: Option<String>,
    pub start_bit: Option<u16>,
    pub length: Option<u16>,
    pub byte_order: Option<ByteOrder>,
    pub value_type: Option<ValueType>,
    pub factor: Option<f64>,
    pub offset: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
    pub receivers: Option<BTreeSet<String>>,
    pub description: Option<String>,
    pub value_descriptions: Option<BTreeMap<i64, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSignal {
    pub message_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendFrame {
    pub id: u32,
    #[serde(default)]
    pub extended: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSignals {
    /// DBC id of the message to build
    pub message_id: u32,
    pub values: BTreeMap<String, f64>,
}

/// A document edit or a transmit request
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddMessage(AddMessage),
    UpdateMessage(UpdateMessage),
    DeleteMessage(DeleteMessage),
    AddSignal(AddSignal),
    UpdateSignal(UpdateSignal),
    DeleteSignal(DeleteSignal),
    SendFrame(SendFrame),
    SendSignals(SendSignals),
}

type PayloadDecoder = fn(Value) -> serde_json::Result<Command>;

fn payload<T: DeserializeOwned>(value: Value, wrap: fn(T) -> Command) -> serde_json::Result<Command> {
    serde_json::from_value(value).map(wrap)
}

/// Discriminator value → payload decoder
static DISPATCH: &[(&str, PayloadDecoder)] = &[
    ("add_message", |v| payload(v, Command::AddMessage)),
    ("update_message", |v| payload(v, Command::UpdateMessage)),
    ("delete_message", |v| payload(v, Command::DeleteMessage)),
    ("add_signal", |v| payload(v, Command::AddSignal)),
    ("update_signal", |v| payload(v, Command::UpdateSignal)),
    ("delete_signal", |v| payload(v, Command::DeleteSignal)),
    ("send_frame", |v| payload(v, Command::SendFrame)),
    ("send_signals", |v| payload(v, Command::SendSignals)),
];

impl Command {
    /// Discriminator written in the `"type"` field
    pub fn kind(&self) -> &'static str {
        match self {
            Command::AddMessage(_) => "add_message",
            Command::UpdateMessage(_) => "update_message",
            Command::DeleteMessage(_) => "delete_message",
            Command::AddSignal(_) => "add_signal",
            Command::UpdateSignal(_) => "update_signal",
            Command::DeleteSignal(_) => "delete_signal",
            Command::SendFrame(_) => "send_frame",
            Command::SendSignals(_) => "send_signals",
        }
    }

    /// Decode one command object
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DbcError::InvalidCommand("missing \"type\" field".to_string()))?
            .to_string();

        let decode = DISPATCH
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, decode)| *decode)
            .ok_or_else(|| DbcError::InvalidCommand(format!("unknown command type '{}'", kind)))?;

        decode(value).map_err(|e| DbcError::InvalidCommand(format!("{}: {}", kind, e)))
    }

    /// Decode a JSON array of commands, or a single command object
    pub fn parse_batch(json: &str) -> Result<Vec<Self>> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| DbcError::InvalidCommand(e.to_string()))?;

        match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            object @ Value::Object(_) => Ok(vec![Self::from_value(object)?]),
            _ => Err(DbcError::InvalidCommand(
                "expected a command object or an array of commands".to_string(),
            )),
        }
    }

    /// Encode as a JSON object carrying the `"type"` discriminator
    pub fn to_value(&self) -> serde_json::Result<Value> {
        let mut value = match self {
            Command::AddMessage(p) => serde_json::to_value(p),
            Command::UpdateMessage(p) => serde_json::to_value(p),
            Command::DeleteMessage(p) => serde_json::to_value(p),
            Command::AddSignal(p) => serde_json::to_value(p),
            Command::UpdateSignal(p) => serde_json::to_value(p),
            Command::DeleteSignal(p) => serde_json::to_value(p),
            Command::SendFrame(p) => serde_json::to_value(p),
            Command::SendSignals(p) => serde_json::to_value(p),
        }?;

        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String(self.kind().to_string()));
        }
        Ok(value)
    }

    /// Whether this command edits the document (as opposed to transmitting)
    pub fn is_edit(&self) -> bool {
        !matches!(self, Command::SendFrame(_) | Command::SendSignals(_))
    }

    /// Build the frame a transmit command asks for; `None` for edit commands
    pub fn to_frame(&self, document: &DbcDocument) -> Option<Result<EncodedFrame>> {
        match self {
            Command::SendFrame(send) => Some(raw_frame(send)),
            Command::SendSignals(send) => Some(MessageDecoder::encode_by_id(
                document,
                send.message_id,
                &send.values,
            )),
            _ => None,
        }
    }

    /// Apply an edit command to `document` in place
    fn edit(&self, document: &mut DbcDocument) -> Result<()> {
        match self {
            Command::AddMessage(add) => {
                if document.message(add.id).is_some() {
                    return Err(DbcError::DuplicateMessage(add.id));
                }
                let mut message = Message::new(add.id, &add.name, add.length, &add.transmitter);
                message.description = add.description.clone();
                validate_message(&message)?;
                document.messages.push(message);
            }
            Command::UpdateMessage(update) => {
                let message = message_mut(document, update.id)?;
                let mut changed = message.clone();
                if let Some(name) = &update.name {
                    changed.name = name.clone();
                }
                if let Some(length) = update.length {
                    changed.length = length;
                }
                if let Some(transmitter) = &update.transmitter {
                    changed.transmitter = transmitter.clone();
                }
                if let Some(description) = &update.description {
                    changed.description = description.clone();
                }
                validate_message(&changed)?;
                *message = changed;
            }
            Command::DeleteMessage(delete) => {
                let before = document.messages.len();
                document.messages.retain(|m| m.id != delete.id);
                if document.messages.len() == before {
                    return Err(DbcError::MessageNotFound(delete.id));
                }
            }
            Command::AddSignal(add) => {
                let message = message_mut(document, add.message_id)?;
                if message.signal(&add.signal.name).is_some() {
                    return Err(DbcError::DuplicateSignal(SignalKey::new(
                        add.message_id,
                        add.signal.name.clone(),
                    )));
                }
                let mut signal = add.signal.clone();
                signal.receivers.remove(NO_NODE);
                validate_signal(message, &signal)?;
                message.signals.push(signal);
            }
            Command::UpdateSignal(update) => {
                let message = message_mut(document, update.message_id)?;
                let key = SignalKey::new(update.message_id, update.name.clone());
                let index = message
                    .signals
                    .iter()
                    .position(|s| s.name == update.name)
                    .ok_or_else(|| DbcError::SignalNotFound(key))?;

                let changed = update.changes.apply(&message.signals[index]);
                if changed.name != update.name && message.signal(&changed.name).is_some() {
                    return Err(DbcError::DuplicateSignal(SignalKey::new(
                        update.message_id,
                        changed.name,
                    )));
                }
                validate_signal(message, &changed)?;
                message.signals[index] = changed;
            }
            Command::DeleteSignal(delete) => {
                let message = message_mut(document, delete.message_id)?;
                let before = message.signals.len();
                message.signals.retain(|s| s.name != delete.name);
                if message.signals.len() == before {
                    return Err(DbcError::SignalNotFound(SignalKey::new(
                        delete.message_id,
                        delete.name.clone(),
                    )));
                }
            }
            Command::SendFrame(_) | Command::SendSignals(_) => {}
        }
        Ok(())
    }
}

impl Serialize for Command {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Command::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl SignalChanges {
    fn apply(&self, signal: &Signal) -> Signal {
        let mut changed = signal.clone();
        if let Some(name) = &self.name {
            changed.name = name.clone();
        }
        if let Some(start_bit) = self.start_bit {
            changed.start_bit = start_bit;
        }
        if let Some(length) = self.length {
            changed.length = length;
        }
        if let Some(byte_order) = self.byte_order {
            changed.byte_order = byte_order;
        }
        if let Some(value_type) = self.value_type {
            changed.value_type = value_type;
        }
        if let Some(factor) = self.factor {
            changed.factor = factor;
        }
        if let Some(offset) = self.offset {
            changed.offset = offset;
        }
        if let Some(min) = self.min {
            changed.min = min;
        }
        if let Some(max) = self.max {
            changed.max = max;
        }
        if let Some(unit) = &self.unit {
            changed.unit = unit.clone();
        }
        if let Some(receivers) = &self.receivers {
            changed.receivers = receivers.iter().filter(|r| *r != NO_NODE).cloned().collect();
        }
        if let Some(description) = &self.description {
            changed.description = description.clone();
        }
        if let Some(values) = &self.value_descriptions {
            changed.value_descriptions = values.clone();
        }
        changed
    }
}

/// What a successful command produced
#[derive(Debug)]
pub enum CommandEffect {
    /// The working document was replaced
    DocumentChanged,
    /// A frame to hand to the transport layer
    Transmit(EncodedFrame),
}

/// Outcome of one command in a batch
#[derive(Debug)]
pub struct CommandResult {
    /// Position of the command in the batch
    pub index: usize,
    pub kind: &'static str,
    pub outcome: Result<CommandEffect>,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// New document plus per-command results
#[derive(Debug)]
pub struct EditOutcome {
    pub document: DbcDocument,
    pub results: Vec<CommandResult>,
}

impl EditOutcome {
    /// True if at least one edit was applied
    pub fn changed(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r.outcome, Ok(CommandEffect::DocumentChanged)))
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Frames produced by transmit commands, in batch order
    pub fn frames(&self) -> impl Iterator<Item = &EncodedFrame> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Ok(CommandEffect::Transmit(frame)) => Some(frame),
            _ => None,
        })
    }
}

/// Apply a batch of commands, returning the resulting document
///
/// Transmit commands are encoded against the document as edited so far.
pub fn apply_commands(document: &DbcDocument, commands: &[Command]) -> EditOutcome {
    let mut working = document.clone();
    let mut results = Vec::with_capacity(commands.len());

    for (index, command) in commands.iter().enumerate() {
        let outcome = match command.to_frame(&working) {
            Some(frame) => frame.map(CommandEffect::Transmit),
            None => {
                let mut candidate = working.clone();
                command.edit(&mut candidate).map(|()| {
                    working = candidate;
                    CommandEffect::DocumentChanged
                })
            }
        };

        if let Err(e) = &outcome {
            log::warn!("Command #{} ({}) failed: {}", index, command.kind(), e);
        }
        results.push(CommandResult {
            index,
            kind: command.kind(),
            outcome,
        });
    }

    EditOutcome {
        document: working,
        results,
    }
}

fn message_mut(document: &mut DbcDocument, id: u32) -> Result<&mut Message> {
    document
        .messages
        .iter_mut()
        .find(|m| m.id == id)
        .ok_or(DbcError::MessageNotFound(id))
}

/// Names as accepted by the DBC grammar (`\w+`)
fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Units and value labels are written inside single-line DBC records
fn is_multi_line(text: &str) -> bool {
    text.contains(['\n', '\r'])
}

fn validate_message(message: &Message) -> Result<()> {
    if !is_identifier(&message.name) {
        return Err(DbcError::InvalidCommand(format!(
            "invalid message name '{}'",
            message.name
        )));
    }
    if !message.transmitter.is_empty() && !is_identifier(&message.transmitter) {
        return Err(DbcError::InvalidCommand(format!(
            "invalid transmitter '{}'",
            message.transmitter
        )));
    }
    if message.length > MAX_PAYLOAD_BYTES {
        return Err(DbcError::InvalidCommand(format!(
            "message length {} exceeds {} bytes",
            message.length, MAX_PAYLOAD_BYTES
        )));
    }
    Ok(())
}

fn validate_signal(message: &Message, signal: &Signal) -> Result<()> {
    if !is_identifier(&signal.name) {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "invalid signal name '{}'",
            signal.name
        )));
    }
    if signal.length == 0 || signal.length > crate::bits::MAX_FIELD_BITS {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "signal '{}' has length {} (expected 1..=64)",
            signal.name, signal.length
        )));
    }
    if signal.factor == 0.0 {
        return Err(DbcError::InvalidScaling {
            signal: signal.name.clone(),
        });
    }
    let numbers = [signal.factor, signal.offset, signal.min, signal.max];
    if numbers.iter().any(|n| !n.is_finite()) {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "signal '{}' has non-finite scaling or range",
            signal.name
        )));
    }

    if let Some(receiver) = signal.receivers.iter().find(|r| !is_identifier(r)) {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "signal '{}' has invalid receiver '{}'",
            signal.name, receiver
        )));
    }
    if is_multi_line(&signal.unit) {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "unit of signal '{}' contains a line break",
            signal.name
        )));
    }
    if let Some(raw) = signal
        .value_descriptions
        .iter()
        .find_map(|(raw, label)| is_multi_line(label).then_some(raw))
    {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "value description {} of signal '{}' contains a line break",
            raw, signal.name
        )));
    }

    if signal.start_bit as usize + signal.length as usize > message.length.saturating_mul(8) {
        log::warn!(
            "Signal '{}' reaches past the {} byte payload of {}",
            signal.name,
            message.length,
            message.name
        );
    }
    Ok(())
}

fn raw_frame(send: &SendFrame) -> Result<EncodedFrame> {
    let max_id = if send.extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
    if send.id > max_id {
        return Err(DbcError::InvalidCommand(format!(
            "CAN ID 0x{:X} out of range for {} frame",
            send.id,
            if send.extended { "an extended" } else { "a standard" }
        )));
    }
    if send.data.len() > MAX_PAYLOAD_BYTES {
        return Err(DbcError::InvalidCommand(format!(
            "payload of {} bytes exceeds {} bytes",
            send.data.len(),
            MAX_PAYLOAD_BYTES
        )));
    }

    Ok(EncodedFrame {
        can_id: send.id,
        is_extended: send.extended,
        data: send.data.clone(),
        failures: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_document() -> DbcDocument {
        DbcDocument {
            messages: vec![Message::new(0x100, "Vehicle", 8, "Body").with_signal(
                Signal::new("Speed", 0, 16, ByteOrder::LittleEndian, ValueType::Unsigned)
                    .with_scaling(0.1, 0.0),
            )],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_batch_dispatches_on_type() {
        let json = r#"[
            {"type": "add_message", "id": 512, "name": "Brakes", "length": 2},
            {"type": "update_message", "id": 256, "description": "Vehicle state"},
            {"type": "delete_message", "id": 768},
            {"type": "add_signal", "message_id": 512, "signal": {
                "name": "Pressure", "start_bit": 7, "length": 12, "byte_order": "big_endian",
                "value_descriptions": {"0": "Released", "4095": "Fault"}
            }},
            {"type": "update_signal", "message_id": 256, "name": "Speed", "changes": {"unit": "km/h"}},
            {"type": "delete_signal", "message_id": 256, "name": "Old"},
            {"type": "send_frame", "id": 291, "data": [1, 2, 3]},
            {"type": "send_signals", "message_id": 256, "values": {"Speed": 50.0}}
        ]"#;

        let commands = Command::parse_batch(json).unwrap();
        let kinds: Vec<_> = commands.iter().map(Command::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "add_message",
                "update_message",
                "delete_message",
                "add_signal",
                "update_signal",
                "delete_signal",
                "send_frame",
                "send_signals"
            ]
        );

        match &commands[3] {
            Command::AddSignal(add) => {
                assert_eq!(add.signal.byte_order, ByteOrder::BigEndian);
                assert_eq!(add.signal.factor, 1.0);
                assert_eq!(add.signal.value_descriptions[&4095], "Fault");
            }
            other => panic!("unexpected command: {:?}", other),
        }
        match &commands[1] {
            Command::UpdateMessage(update) => {
                assert_eq!(update.name, None);
                assert_eq!(update.description.as_deref(), Some("Vehicle state"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_or_missing_type() {
        assert!(matches!(
            Command::parse_batch(r#"{"type": "reboot"}"#),
            Err(DbcError::InvalidCommand(msg)) if msg.contains("reboot")
        ));
        assert!(Command::parse_batch(r#"{"id": 1}"#).is_err());
        assert!(Command::parse_batch(r#"{"type": "delete_message"}"#).is_err());
        assert!(Command::parse_batch("42").is_err());
    }

    #[test]
    fn test_to_value_round_trip() {
        let command = Command::SendFrame(SendFrame {
            id: 0x123,
            extended: false,
            data: vec![0xAA],
        });
        let value = command.to_value().unwrap();
        assert_eq!(value["type"], "send_frame");
        assert_eq!(Command::from_value(value).unwrap(), command);

        let json = serde_json::to_string(&command).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn test_apply_edits_returns_new_document() {
        let original = base_document();
        let commands = vec![
            Command::AddMessage(AddMessage {
                id: 0x200,
                name: "Brakes".to_string(),
                length: 2,
                transmitter: String::new(),
                description: "Brake status".to_string(),
            }),
            Command::AddSignal(AddSignal {
                message_id: 0x200,
                signal: Signal::new("Pressed", 0, 1, ByteOrder::LittleEndian, ValueType::Unsigned),
            }),
            Command::UpdateSignal(UpdateSignal {
                message_id: 0x100,
                name: "Speed".to_string(),
                changes: SignalChanges {
                    name: Some("VehicleSpeed".to_string()),
                    unit: Some("km/h".to_string()),
                    ..Default::default()
                },
            }),
        ];

        let outcome = apply_commands(&original, &commands);
        assert_eq!(outcome.failures(), 0);
        assert!(outcome.changed());

        // Input untouched
        assert_eq!(original, base_document());

        let doc = &outcome.document;
        assert_eq!(doc.message(0x200).unwrap().description, "Brake status");
        assert_eq!(doc.message(0x200).unwrap().signals.len(), 1);
        let speed = doc.message(0x100).unwrap().signal("VehicleSpeed").unwrap();
        assert_eq!(speed.unit, "km/h");
        assert_eq!(speed.factor, 0.1);
    }

    #[test]
    fn test_failed_command_does_not_stop_batch() {
        let commands = vec![
            Command::AddMessage(AddMessage {
                id: 0x100,
                name: "Clash".to_string(),
                length: 8,
                transmitter: String::new(),
                description: String::new(),
            }),
            Command::AddSignal(AddSignal {
                message_id: 0x100,
                signal: Signal::new("Zero", 16, 8, ByteOrder::LittleEndian, ValueType::Unsigned)
                    .with_scaling(0.0, 0.0),
            }),
            Command::DeleteSignal(DeleteSignal {
                message_id: 0x100,
                name: "Missing".to_string(),
            }),
            Command::DeleteMessage(DeleteMessage { id: 0x999 }),
            Command::UpdateMessage(UpdateMessage {
                id: 0x100,
                name: None,
                length: Some(4),
                transmitter: None,
                description: None,
            }),
        ];

        let outcome = apply_commands(&base_document(), &commands);
        assert_eq!(outcome.failures(), 4);
        assert!(matches!(outcome.results[0].outcome, Err(DbcError::DuplicateMessage(0x100))));
        assert!(matches!(outcome.results[1].outcome, Err(DbcError::InvalidScaling { .. })));
        assert!(matches!(outcome.results[2].outcome, Err(DbcError::SignalNotFound(_))));
        assert!(matches!(outcome.results[3].outcome, Err(DbcError::MessageNotFound(0x999))));
        assert!(outcome.results[4].is_success());

        let msg = outcome.document.message(0x100).unwrap();
        assert_eq!(msg.length, 4);
        assert_eq!(msg.signals.len(), 1);
    }

    #[test]
    fn test_invalid_names_and_lengths_rejected() {
        let commands = vec![
            Command::AddMessage(AddMessage {
                id: 0x300,
                name: "Has Space".to_string(),
                length: 8,
                transmitter: String::new(),
                description: String::new(),
            }),
            Command::AddMessage(AddMessage {
                id: 0x301,
                name: "TooLong".to_string(),
                length: 65,
                transmitter: String::new(),
                description: String::new(),
            }),
            Command::AddSignal(AddSignal {
                message_id: 0x100,
                signal: Signal::new("Wide", 0, 65, ByteOrder::LittleEndian, ValueType::Unsigned),
            }),
        ];

        let outcome = apply_commands(&base_document(), &commands);
        assert_eq!(outcome.failures(), 3);
        assert!(!outcome.changed());
        assert_eq!(outcome.document, base_document());
    }

    #[test]
    fn test_line_breaks_in_units_and_labels_rejected() {
        let update = |changes: SignalChanges| {
            Command::UpdateSignal(UpdateSignal {
                message_id: 0x100,
                name: "Speed".to_string(),
                changes,
            })
        };
        let commands = vec![
            update(SignalChanges {
                unit: Some("k\nm".to_string()),
                ..Default::default()
            }),
            update(SignalChanges {
                value_descriptions: Some(BTreeMap::from([(0, "a\r\nb".to_string())])),
                ..Default::default()
            }),
            update(SignalChanges {
                receivers: Some(BTreeSet::from(["Dash Board".to_string()])),
                ..Default::default()
            }),
        ];

        let outcome = apply_commands(&base_document(), &commands);
        assert_eq!(outcome.failures(), 3);
        assert!(outcome
            .results
            .iter()
            .all(|r| matches!(r.outcome, Err(DbcError::InvalidSignalDefinition(_)))));
        assert_eq!(outcome.document, base_document());
    }

    #[test]
    fn test_edited_document_survives_serialization() {
        use crate::signals::{parse_dbc, write_dbc};

        let original = parse_dbc(&write_dbc(&base_document()));
        let commands = vec![
            Command::UpdateSignal(UpdateSignal {
                message_id: 0x100,
                name: "Speed".to_string(),
                changes: SignalChanges {
                    unit: Some("km/h \"gps\" C:\\".to_string()),
                    value_descriptions: Some(BTreeMap::from([(0, "Stopped \"idle\"".to_string())])),
                    description: Some("first line\nsecond line".to_string()),
                    ..Default::default()
                },
            }),
            Command::UpdateMessage(UpdateMessage {
                id: 0x100,
                name: None,
                length: None,
                transmitter: None,
                description: Some("ends in a backslash \\".to_string()),
            }),
        ];

        let outcome = apply_commands(&original, &commands);
        assert_eq!(outcome.failures(), 0);
        assert_eq!(parse_dbc(&write_dbc(&outcome.document)), outcome.document);
    }

    #[test]
    fn test_signal_on_oversized_message_does_not_overflow() {
        let document = DbcDocument {
            messages: vec![Message::new(0x400, "Huge", usize::MAX, "")],
            ..Default::default()
        };
        let commands = vec![Command::AddSignal(AddSignal {
            message_id: 0x400,
            signal: Signal::new("A", 0, 8, ByteOrder::LittleEndian, ValueType::Unsigned),
        })];

        let outcome = apply_commands(&document, &commands);
        assert_eq!(outcome.failures(), 0);
        assert_eq!(outcome.document.message(0x400).unwrap().signals.len(), 1);
    }

    #[test]
    fn test_transmit_commands_use_edited_document() {
        let commands = vec![
            Command::AddMessage(AddMessage {
                id: 0x200,
                name: "Lights".to_string(),
                length: 1,
                transmitter: String::new(),
                description: String::new(),
            }),
            Command::AddSignal(AddSignal {
                message_id: 0x200,
                signal: Signal::new("Level", 0, 8, ByteOrder::LittleEndian, ValueType::Unsigned),
            }),
            Command::SendSignals(SendSignals {
                message_id: 0x200,
                values: BTreeMap::from([("Level".to_string(), 42.0)]),
            }),
            Command::SendFrame(SendFrame {
                id: 0x7FF,
                extended: false,
                data: vec![1, 2],
            }),
            Command::SendFrame(SendFrame {
                id: 0x800,
                extended: false,
                data: vec![],
            }),
        ];

        let outcome = apply_commands(&base_document(), &commands);
        assert_eq!(outcome.failures(), 1);

        let frames: Vec<_> = outcome.frames().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].can_id, 0x200);
        assert_eq!(frames[0].data, vec![42]);
        assert_eq!(frames[1].data, vec![1, 2]);
    }
}
