//! Signal database and DBC text format
//!
//! This module contains the in-memory document model, the DBC parser and the
//! DBC serializer.

pub mod database;
pub mod dbc;
pub mod writer;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, DbcDocument, Message, MultiplexIndicator, Node, Signal, SignalKey,
    ValueType, EXTENDED_ID_FLAG, MAX_PAYLOAD_BYTES, NO_NODE,
};
pub use dbc::{load_dbc_file, parse_dbc, parse_dbc_with_report, ParseReport};
pub use writer::{save_dbc_file, write_dbc};
