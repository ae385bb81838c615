//! CAN DBC Library
//!
//! Parses and writes DBC signal databases, and converts between raw CAN payloads
//! and physical signal values.
//!
//! # Architecture
//!
//! - [`signals`] holds the document model with the DBC parser and serializer
//! - [`bits`] extracts and inserts bit fields in both byte orders
//! - [`message_decoder`] decodes and encodes whole messages against a document
//! - [`commands`] edits documents functionally from JSON-encoded commands
//! - [`snapshot`] publishes the active document to concurrent readers
//! - [`decoder`] ties these together behind [`Decoder`]
//!
//! The library does NOT:
//! - Talk to CAN hardware or sockets
//! - Decode multiplexed signals by selector value
//! - Track signal value changes over time
//!
//! # Example Usage
//!
//! ```no_run
//! use canlink_dbc::{CanFrame, Decoder, DecoderConfig};
//! use std::path::Path;
//!
//! let decoder = Decoder::with_config(DecoderConfig::new().with_raw_frames(true));
//! decoder.load_dbc(Path::new("powertrain.dbc")).unwrap();
//!
//! let frames = vec![CanFrame::new(0x100, vec![0x10, 0x27, 0, 0, 0, 0, 0, 0])];
//! for event in decoder.decode_frames(frames) {
//!     for signal in event.signals() {
//!         println!("{} = {}", signal.name(), signal.formatted);
//!     }
//! }
//! ```

pub mod bits;
pub mod commands;
pub mod config;
pub mod decoder;
pub mod message_decoder;
pub mod signals;
pub mod snapshot;
pub mod types;

// Re-export main types for convenience
pub use commands::{apply_commands, Command, CommandEffect, CommandResult, EditOutcome};
pub use config::DecoderConfig;
pub use decoder::{Decoder, DecodingIterator};
pub use message_decoder::{EncodedFrame, MessageDecoder, SignalFailure};
pub use signals::{
    ByteOrder, DatabaseStats, DbcDocument, Message, Node, ParseReport, Signal, SignalKey, ValueType,
};
pub use snapshot::{DocumentStore, Snapshot};
pub use types::{CanFrame, DbcError, DecodedEvent, DecodedSignal, Result, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
