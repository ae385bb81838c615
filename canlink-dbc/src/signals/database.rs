//! DBC document model
//!
//! An immutable snapshot of one parsed DBC file. Parsing always builds a fresh
//! document, and edits produce a new document instead of mutating a shared one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Bit 31 marks an extended (29-bit) identifier in DBC message ids
pub const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Receiver/transmitter placeholder used by DBC tooling when no node applies
pub const NO_NODE: &str = "Vector__XXX";

/// Largest payload of a message or raw frame (CAN FD)
pub const MAX_PAYLOAD_BYTES: usize = 64;

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Little-endian (Intel format), `@1` in DBC
    #[default]
    LittleEndian,
    /// Big-endian (Motorola format), `@0` in DBC
    BigEndian,
}

impl ByteOrder {
    /// Map the DBC byte-order digit
    pub fn from_dbc_digit(digit: &str) -> Option<Self> {
        match digit {
            "0" => Some(ByteOrder::BigEndian),
            "1" => Some(ByteOrder::LittleEndian),
            _ => None,
        }
    }

    pub fn dbc_digit(self) -> char {
        match self {
            ByteOrder::BigEndian => '0',
            ByteOrder::LittleEndian => '1',
        }
    }
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Two's-complement signed integer, `-` in DBC
    Signed,
    /// Unsigned integer, `+` in DBC
    #[default]
    Unsigned,
}

impl ValueType {
    /// Map the DBC sign character
    pub fn from_dbc_sign(sign: &str) -> Option<Self> {
        match sign {
            "-" => Some(ValueType::Signed),
            "+" => Some(ValueType::Unsigned),
            _ => None,
        }
    }

    pub fn dbc_sign(self) -> char {
        match self {
            ValueType::Signed => '-',
            ValueType::Unsigned => '+',
        }
    }
}

/// Multiplexer indicator as written after the signal name
///
/// Kept so documents survive a parse/serialize cycle; decoding does not select
/// signals by multiplexer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplexIndicator {
    /// `M`: this signal is the multiplexer switch
    Multiplexor,
    /// `m<N>`: present when the switch equals N
    MultiplexedSignal(u64),
    /// `m<N>M`: extended multiplexing, both switch and switched
    MultiplexorAndMultiplexedSignal(u64),
}

impl MultiplexIndicator {
    pub fn parse(token: &str) -> Option<Self> {
        if token == "M" {
            return Some(MultiplexIndicator::Multiplexor);
        }
        let body = token.strip_prefix('m')?;
        match body.strip_suffix('M') {
            Some(value) => value
                .parse()
                .ok()
                .map(MultiplexIndicator::MultiplexorAndMultiplexedSignal),
            None => body.parse().ok().map(MultiplexIndicator::MultiplexedSignal),
        }
    }
}

impl fmt::Display for MultiplexIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiplexIndicator::Multiplexor => write!(f, "M"),
            MultiplexIndicator::MultiplexedSignal(v) => write!(f, "m{}", v),
            MultiplexIndicator::MultiplexorAndMultiplexedSignal(v) => write!(f, "m{}M", v),
        }
    }
}

/// Stable identity of a signal inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalKey {
    pub message_id: u32,
    pub signal_name: String,
}

impl SignalKey {
    pub fn new(message_id: u32, signal_name: impl Into<String>) -> Self {
        Self {
            message_id,
            signal_name: signal_name.into(),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}.{}", self.message_id, self.signal_name)
    }
}

/// A network node (ECU) declared on the `BU_:` line
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Comment from `CM_ BU_`
    #[serde(default)]
    pub comment: String,
    /// Attributes from `BA_ "..." BU_`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

fn default_factor() -> f64 {
    1.0
}

/// A CAN signal definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name, unique within its message
    pub name: String,
    /// Start bit in the CAN frame (LSB for Intel, MSB for Motorola)
    pub start_bit: u16,
    /// Length in bits (1..=64)
    pub length: u16,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Offset to add after scaling
    #[serde(default)]
    pub offset: f64,
    /// Minimum physical value
    #[serde(default)]
    pub min: f64,
    /// Maximum physical value
    #[serde(default)]
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    #[serde(default)]
    pub unit: String,
    /// Receiving nodes; the `Vector__XXX` placeholder is never stored
    #[serde(default)]
    pub receivers: BTreeSet<String>,
    /// Comment from `CM_ SG_`
    #[serde(default)]
    pub description: String,
    /// Labels for raw values from `VAL_`
    #[serde(default)]
    pub value_descriptions: BTreeMap<i64, String>,
    /// Attributes from `BA_ "..." SG_`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub multiplexer: Option<MultiplexIndicator>,
}

impl Signal {
    /// A signal with identity scaling and no metadata
    pub fn new(
        name: impl Into<String>,
        start_bit: u16,
        length: u16,
        byte_order: ByteOrder,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order,
            value_type,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: String::new(),
            receivers: BTreeSet::new(),
            description: String::new(),
            value_descriptions: BTreeMap::new(),
            attributes: BTreeMap::new(),
            multiplexer: None,
        }
    }

    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn is_signed(&self) -> bool {
        self.value_type == ValueType::Signed
    }
}

/// A complete CAN message definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// CAN message ID as written in the DBC (bit 31 set for extended ids)
    pub id: u32,
    pub name: String,
    /// Payload size in bytes
    pub length: usize,
    /// Sending node, empty when unknown
    #[serde(default)]
    pub transmitter: String,
    /// Comment from `CM_ BO_`
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub signals: Vec<Signal>,
    /// Attributes from `BA_ "..." BO_`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Message {
    pub fn new(id: u32, name: impl Into<String>, length: usize, transmitter: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            length,
            transmitter: transmitter.into(),
            description: String::new(),
            signals: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Identifier without the extended flag
    pub fn raw_id(&self) -> u32 {
        self.id & !EXTENDED_ID_FLAG
    }

    pub fn is_extended(&self) -> bool {
        self.id & EXTENDED_ID_FLAG != 0
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn transmitter(&self) -> Option<&str> {
        if self.transmitter.is_empty() || self.transmitter == NO_NODE {
            None
        } else {
            Some(&self.transmitter)
        }
    }
}

/// One parsed DBC file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DbcDocument {
    pub version: String,
    /// Global comment from `CM_ "..."`
    #[serde(default)]
    pub comment: String,
    pub nodes: Vec<Node>,
    pub messages: Vec<Message>,
    /// Named value tables from `VAL_TABLE_`
    pub value_tables: BTreeMap<String, BTreeMap<i64, String>>,
    /// File-level attributes from `BA_`
    pub attributes: BTreeMap<String, String>,
}

impl DbcDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message with exactly this DBC id
    pub fn message(&self, id: u32) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Message matching an observed frame
    ///
    /// Extended frames also match DBC ids carrying the extended flag.
    pub fn message_for_frame(&self, can_id: u32, is_extended: bool) -> Option<&Message> {
        self.message(can_id).or_else(|| {
            if is_extended {
                self.message(can_id | EXTENDED_ID_FLAG)
            } else {
                None
            }
        })
    }

    pub fn message_by_name(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }

    pub fn signal(&self, key: &SignalKey) -> Option<&Signal> {
        self.message(key.message_id)?.signal(&key.signal_name)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Find all messages containing a specific signal name
    pub fn find_signal(&self, signal_name: &str) -> Vec<(u32, &Signal)> {
        self.messages
            .iter()
            .filter_map(|msg| msg.signal(signal_name).map(|sig| (msg.id, sig)))
            .collect()
    }

    /// Get document statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_nodes: self.nodes.len(),
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
            num_value_tables: self.value_tables.len(),
        }
    }
}

/// Document statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DatabaseStats {
    pub num_nodes: usize,
    pub num_messages: usize,
    pub num_signals: usize,
    pub num_value_tables: usize,
}
