//! Main decoder API
//!
//! The Decoder struct is the entry point for the library. It owns the document
//! store and the decoding configuration, loads DBC files into the store, and decodes
//! or encodes frames against the currently published document.

use crate::commands::{self, Command, EditOutcome};
use crate::config::DecoderConfig;
use crate::message_decoder::{EncodedFrame, MessageDecoder};
use crate::signals::database::{DatabaseStats, DbcDocument};
use crate::signals::dbc::{self, ParseReport};
use crate::signals::writer;
use crate::snapshot::{DocumentStore, Snapshot};
use crate::types::{CanFrame, DecodedEvent, DecodedSignal, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// The main decoder struct - entry point for all decoding operations
pub struct Decoder {
    store: DocumentStore,
    config: DecoderConfig,
}

impl Decoder {
    /// Create a decoder with an empty document and default configuration
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            store: DocumentStore::new(),
            config,
        }
    }

    /// Load a DBC file and publish it as the active document
    ///
    /// # Example
    /// ```no_run
    /// use canlink_dbc::Decoder;
    /// use std::path::Path;
    ///
    /// let decoder = Decoder::new();
    /// let report = decoder.load_dbc(Path::new("powertrain.dbc")).unwrap();
    /// println!("{} messages loaded", report.messages);
    /// ```
    pub fn load_dbc(&self, path: &Path) -> Result<ParseReport> {
        let (document, report) = dbc::load_dbc_file(path)?;
        self.publish_parsed(document, report);
        Ok(report)
    }

    /// Parse DBC text and publish it as the active document
    pub fn load_dbc_str(&self, text: &str) -> ParseReport {
        let (document, report) = dbc::parse_dbc_with_report(text);
        self.publish_parsed(document, report);
        report
    }

    fn publish_parsed(&self, document: DbcDocument, report: ParseReport) {
        if !report.is_clean() {
            log::warn!(
                "DBC loaded with {} skipped records, {} duplicates, {} unresolved references",
                report.skipped_records,
                report.duplicate_definitions,
                report.unresolved()
            );
        }
        self.store.publish(document);
    }

    /// Replace the active document
    pub fn publish(&self, document: DbcDocument) -> Snapshot {
        self.store.publish(document)
    }

    /// Active document
    pub fn document(&self) -> Arc<DbcDocument> {
        self.store.document()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Receive every document published after this call
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        self.store.subscribe()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode the signals of one frame against the active document
    pub fn decode_frame(&self, frame: &CanFrame) -> Vec<DecodedSignal> {
        MessageDecoder::decode_frame(frame, &self.document(), &self.config)
    }

    /// Decode a stream of frames into events
    ///
    /// The whole stream is decoded against the document that is active when this
    /// is called, even if a new one is published meanwhile.
    pub fn decode_frames<I>(&self, frames: I) -> DecodingIterator<I::IntoIter>
    where
        I: IntoIterator<Item = CanFrame>,
    {
        DecodingIterator::new(frames.into_iter(), self.document(), self.config.clone())
    }

    /// Encode physical values into a payload for the message with DBC id `message_id`
    pub fn encode_message(&self, message_id: u32, values: &BTreeMap<String, f64>) -> Result<EncodedFrame> {
        MessageDecoder::encode_by_id(&self.document(), message_id, values)
    }

    /// Apply commands to the active document, publishing the result if anything changed
    ///
    /// Concurrent callers are serialized, so each batch sees the edits of the
    /// batches published before it.
    pub fn apply_commands(&self, commands: &[Command]) -> EditOutcome {
        let (_, outcome) = self.store.update(|document| {
            let outcome = commands::apply_commands(document, commands);
            let next = outcome.changed().then(|| outcome.document.clone());
            (next, outcome)
        });
        outcome
    }

    /// Write the active document to a `.dbc` file
    pub fn export_dbc(&self, path: &Path) -> Result<()> {
        writer::save_dbc_file(path, &self.document())
    }

    /// Get statistics about the active document
    pub fn database_stats(&self) -> DatabaseStats {
        self.document().stats()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator that decodes CAN frames into events against one document snapshot
///
/// Frames the configuration drops (unknown or filtered ids without raw emission)
/// produce no event.
pub struct DecodingIterator<I>
where
    I: Iterator<Item = CanFrame>,
{
    frames: I,
    document: Arc<DbcDocument>,
    config: DecoderConfig,
}

impl<I> DecodingIterator<I>
where
    I: Iterator<Item = CanFrame>,
{
    fn new(frames: I, document: Arc<DbcDocument>, config: DecoderConfig) -> Self {
        Self {
            frames,
            document,
            config,
        }
    }
}

impl<I> Iterator for DecodingIterator<I>
where
    I: Iterator<Item = CanFrame>,
{
    type Item = DecodedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frames.next()?;
            if let Some(event) = MessageDecoder::decode_event(&frame, &self.document, &self.config) {
                return Some(event);
            }
        }
    }
}
