//! DBC file parser
//!
//! Single forward pass over the lines of a Vector DBC file. Each logical record
//! is dispatched on its leading keyword. `CM_` records may continue over several
//! physical lines until their quoted text is closed or a line ends in `";`. The
//! comment text runs up to the last quote of the record.
//!
//! Comments, value descriptions and scoped attributes are collected during the
//! scan and merged into messages and signals afterwards, so they may appear before
//! or after the definitions they refer to. Records that do not match their grammar
//! are skipped and counted in the [`ParseReport`]; parsing itself never fails.

use crate::signals::database::{
    ByteOrder, DbcDocument, Message, MultiplexIndicator, Node, Signal, ValueType,
    MAX_PAYLOAD_BYTES, NO_NODE,
};
use crate::types::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

type LazyRegex = Lazy<Regex>;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("DBC grammar pattern must compile")
}

static VERSION_RE: LazyRegex = LazyRegex::new(|| regex(r#"^VERSION\s+"((?:[^"\\]|\\.)*)""#));

static NODES_RE: LazyRegex = LazyRegex::new(|| regex(r"^BU_\s*:(.*)$"));

static MESSAGE_RE: LazyRegex =
    LazyRegex::new(|| regex(r"^BO_\s+(\d+)\s+(\w+)\s*:\s*(\d+)(?:\s+(\w+))?\s*$"));

static SIGNAL_RE: LazyRegex = LazyRegex::new(|| {
    regex(
        r#"^SG_\s+(?P<name>\w+)(?:\s+(?P<mux>M|m\d+M?))?\s*:\s*(?P<start>\d+)\s*\|\s*(?P<len>\d+)\s*@\s*(?P<order>[01])\s*(?P<sign>[+-])\s*\(\s*(?P<factor>[^,\s]+)\s*,\s*(?P<offset>[^)\s]+)\s*\)\s*\[\s*(?P<min>[^|\s]+)\s*\|\s*(?P<max>[^\]\s]+)\s*\]\s*"(?P<unit>(?:[^"\\]|\\.)*)"\s*(?P<receivers>.*)$"#,
    )
});

static MESSAGE_COMMENT_RE: LazyRegex =
    LazyRegex::new(|| regex(r#"(?s)^CM_\s+BO_\s+(\d+)\s*"(.*)"[^"]*$"#));

static SIGNAL_COMMENT_RE: LazyRegex =
    LazyRegex::new(|| regex(r#"(?s)^CM_\s+SG_\s+(\d+)\s+(\w+)\s*"(.*)"[^"]*$"#));

static NODE_COMMENT_RE: LazyRegex =
    LazyRegex::new(|| regex(r#"(?s)^CM_\s+BU_\s+(\w+)\s*"(.*)"[^"]*$"#));

static ENV_COMMENT_RE: LazyRegex = LazyRegex::new(|| regex(r#"^CM_\s+EV_\s+\w+\s*""#));

static GLOBAL_COMMENT_RE: LazyRegex = LazyRegex::new(|| regex(r#"(?s)^CM_\s*"(.*)"[^"]*$"#));

static VALUE_DESCRIPTIONS_RE: LazyRegex = LazyRegex::new(|| regex(r"^VAL_\s+(\d+)\s+(\w+)\s+(.*)$"));

static VALUE_TABLE_RE: LazyRegex = LazyRegex::new(|| regex(r"^VAL_TABLE_\s+(\w+)\s*(.*)$"));

static VALUE_PAIR_RE: LazyRegex = LazyRegex::new(|| regex(r#"(-?\d+)\s+"((?:[^"\\]|\\.)*)""#));

static ATTRIBUTE_RE: LazyRegex = LazyRegex::new(|| regex(r#"^BA_\s+"([^"]+)"\s+(.*?)\s*;?\s*$"#));

static MESSAGE_ATTRIBUTE_RE: LazyRegex = LazyRegex::new(|| regex(r"^BO_\s+(\d+)\s+(.+)$"));

static SIGNAL_ATTRIBUTE_RE: LazyRegex = LazyRegex::new(|| regex(r"^SG_\s+(\d+)\s+(\w+)\s+(.+)$"));

static NODE_ATTRIBUTE_RE: LazyRegex = LazyRegex::new(|| regex(r"^BU_\s+(\w+)\s+(.+)$"));

/// Counters describing how much of the input made it into the document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub messages: usize,
    pub signals: usize,
    /// Records that matched a keyword but not its grammar
    pub skipped_records: usize,
    /// Messages, signals or nodes defined more than once (later ones dropped)
    pub duplicate_definitions: usize,
    /// Comments referring to unknown messages, signals or nodes
    pub unresolved_comments: usize,
    /// `VAL_` records referring to unknown signals
    pub unresolved_value_descriptions: usize,
    /// Scoped `BA_` records referring to unknown objects
    pub unresolved_attributes: usize,
}

impl ParseReport {
    pub fn unresolved(&self) -> usize {
        self.unresolved_comments + self.unresolved_value_descriptions + self.unresolved_attributes
    }

    /// True when nothing was skipped, duplicated or left unresolved
    pub fn is_clean(&self) -> bool {
        self.skipped_records == 0 && self.duplicate_definitions == 0 && self.unresolved() == 0
    }
}

/// Parse DBC text into a document
pub fn parse_dbc(text: &str) -> DbcDocument {
    parse_dbc_with_report(text).0
}

/// Parse DBC text, also returning diagnostics about dropped records
pub fn parse_dbc_with_report(text: &str) -> (DbcDocument, ParseReport) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut state = ParseState::default();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match Statement::classify(trimmed) {
            Statement::Version => state.version(trimmed),
            Statement::Nodes => state.nodes(trimmed),
            Statement::Message => state.message(trimmed),
            Statement::Signal => state.signal(trimmed),
            Statement::Comment => {
                let record = read_quoted_record(trimmed, &mut lines);
                state.comment(&record);
            }
            Statement::ValueDescriptions => state.value_descriptions(trimmed),
            Statement::ValueTable => state.value_table(trimmed),
            Statement::Attribute => state.attribute(trimmed),
            Statement::Other => {}
        }
    }

    state.finish()
}

/// Read and parse a DBC file
///
/// Files that are not valid UTF-8 are decoded as Latin-1, which covers the
/// Windows-1252 files produced by most DBC editors.
pub fn load_dbc_file(path: &Path) -> Result<(DbcDocument, ParseReport)> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("DBC file {:?} is not UTF-8, trying Latin-1 encoding", path);
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let (document, report) = parse_dbc_with_report(&text);

    log::info!(
        "Parsed {} messages ({} signals) from {:?}",
        report.messages,
        report.signals,
        path
    );

    Ok((document, report))
}

/// Statement kinds recognised by their leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement {
    Version,
    Nodes,
    Message,
    Signal,
    Comment,
    ValueDescriptions,
    ValueTable,
    Attribute,
    Other,
}

impl Statement {
    fn classify(line: &str) -> Self {
        let keyword = line
            .split(|c: char| c.is_whitespace() || c == ':')
            .next()
            .unwrap_or_default();

        // Bare keywords are the symbol list of the `NS_` section
        if keyword.len() == line.len() {
            return Statement::Other;
        }

        match keyword {
            "VERSION" => Statement::Version,
            "BU_" => Statement::Nodes,
            "BO_" => Statement::Message,
            "SG_" => Statement::Signal,
            "CM_" => Statement::Comment,
            "VAL_" => Statement::ValueDescriptions,
            "VAL_TABLE_" => Statement::ValueTable,
            "BA_" => Statement::Attribute,
            _ => Statement::Other,
        }
    }
}

/// Join continuation lines until the record's first quoted string is closed
///
/// A line ending in `";` also ends the record, so a comment whose text ends in a
/// backslash (`"C:\";`) does not swallow the statements after it.
fn read_quoted_record<'a, I>(first: &str, lines: &mut I) -> String
where
    I: Iterator<Item = &'a str>,
{
    let mut record = first.to_string();
    let mut last = first;
    while !first_quote_closed(&record) && !last.trim_end().ends_with("\";") {
        match lines.next() {
            Some(next) => {
                record.push('\n');
                record.push_str(next);
                last = next;
            }
            None => break,
        }
    }
    record
}

fn first_quote_closed(record: &str) -> bool {
    let Some(open) = record.find('"') else {
        return true;
    };

    let mut escaped = false;
    for c in record[open + 1..].chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return true,
            _ => {}
        }
    }
    false
}

/// Undo the `\"` and `\\` escapes used inside DBC strings
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn strip_quotes(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => unescape(inner),
        None => value.to_string(),
    }
}

fn value_pairs(text: &str) -> BTreeMap<i64, String> {
    VALUE_PAIR_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let value = cap[1].parse::<i64>().ok()?;
            Some((value, unescape(&cap[2])))
        })
        .collect()
}

/// Signal under construction, created from a `SG_` line
fn signal_from_captures(cap: &Captures<'_>) -> Option<Signal> {
    let number = |name: &str| cap.name(name)?.as_str().parse::<f64>().ok();

    let length: u16 = cap["len"].parse().ok()?;
    if length == 0 || length > crate::bits::MAX_FIELD_BITS {
        return None;
    }

    let receivers: BTreeSet<String> = cap["receivers"]
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|r| !r.is_empty() && *r != NO_NODE)
        .map(String::from)
        .collect();

    let mut signal = Signal::new(
        &cap["name"],
        cap["start"].parse().ok()?,
        length,
        ByteOrder::from_dbc_digit(&cap["order"])?,
        ValueType::from_dbc_sign(&cap["sign"])?,
    )
    .with_scaling(number("factor")?, number("offset")?)
    .with_range(number("min")?, number("max")?)
    .with_unit(unescape(&cap["unit"]));

    signal.receivers = receivers;
    signal.multiplexer = match cap.name("mux") {
        Some(token) => Some(MultiplexIndicator::parse(token.as_str())?),
        None => None,
    };

    Some(signal)
}

/// Message accumulator for the `BO_` record currently open
struct MessageBuilder {
    message: Message,
    signal_names: HashSet<String>,
}

impl MessageBuilder {
    fn new(message: Message) -> Self {
        Self {
            message,
            signal_names: HashSet::new(),
        }
    }

    /// Append a signal; false if its name is already taken in this message
    fn push_signal(&mut self, signal: Signal) -> bool {
        if !self.signal_names.insert(signal.name.clone()) {
            return false;
        }
        self.message.signals.push(signal);
        true
    }

    fn finish(self) -> Message {
        self.message
    }
}

#[derive(Default)]
struct ParseState {
    document: DbcDocument,
    current: Option<MessageBuilder>,
    message_ids: HashSet<u32>,
    message_comments: HashMap<u32, String>,
    signal_comments: HashMap<(u32, String), String>,
    node_comments: HashMap<String, String>,
    value_descriptions: HashMap<(u32, String), BTreeMap<i64, String>>,
    message_attributes: Vec<(u32, String, String)>,
    signal_attributes: Vec<(u32, String, String, String)>,
    node_attributes: Vec<(String, String, String)>,
    report: ParseReport,
}

impl ParseState {
    fn skip(&mut self, line: &str) {
        log::warn!("Skipping malformed DBC record: {}", line.lines().next().unwrap_or(line));
        self.report.skipped_records += 1;
    }

    fn version(&mut self, line: &str) {
        self.document.version = VERSION_RE
            .captures(line)
            .map(|cap| unescape(&cap[1]))
            .unwrap_or_default();
    }

    fn nodes(&mut self, line: &str) {
        let Some(cap) = NODES_RE.captures(line) else {
            return self.skip(line);
        };

        for name in cap[1].split_whitespace() {
            if self.document.nodes.iter().any(|n| n.name == name) {
                log::warn!("Duplicate node '{}' ignored", name);
                self.report.duplicate_definitions += 1;
                continue;
            }
            self.document.nodes.push(Node::new(name));
        }
    }

    fn message(&mut self, line: &str) {
        self.flush_message();

        let Some(cap) = MESSAGE_RE.captures(line) else {
            return self.skip(line);
        };
        let (Ok(id), Ok(length)) = (cap[1].parse::<u32>(), cap[3].parse::<usize>()) else {
            return self.skip(line);
        };
        if length > MAX_PAYLOAD_BYTES {
            return self.skip(line);
        }
        let transmitter = cap
            .get(4)
            .map(|m| m.as_str())
            .filter(|name| *name != NO_NODE)
            .unwrap_or_default();

        self.current = Some(MessageBuilder::new(Message::new(id, &cap[2], length, transmitter)));
    }

    fn signal(&mut self, line: &str) {
        let Some(signal) = SIGNAL_RE.captures(line).and_then(|cap| signal_from_captures(&cap)) else {
            return self.skip(line);
        };

        match self.current.as_mut() {
            Some(builder) => {
                if !builder.push_signal(signal) {
                    log::warn!(
                        "Duplicate signal in message 0x{:X} ignored: {}",
                        builder.message.id,
                        line
                    );
                    self.report.duplicate_definitions += 1;
                }
            }
            None => {
                log::warn!("Signal outside of any message ignored: {}", line);
                self.report.skipped_records += 1;
            }
        }
    }

    fn flush_message(&mut self) {
        let Some(builder) = self.current.take() else {
            return;
        };
        let message = builder.finish();

        if !self.message_ids.insert(message.id) {
            log::warn!("Duplicate message 0x{:X} ({}) ignored", message.id, message.name);
            self.report.duplicate_definitions += 1;
            return;
        }
        self.document.messages.push(message);
    }

    fn comment(&mut self, record: &str) {
        if let Some(cap) = SIGNAL_COMMENT_RE.captures(record) {
            if let Ok(id) = cap[1].parse::<u32>() {
                self.signal_comments
                    .insert((id, cap[2].to_string()), unescape(&cap[3]));
                return;
            }
        } else if let Some(cap) = MESSAGE_COMMENT_RE.captures(record) {
            if let Ok(id) = cap[1].parse::<u32>() {
                self.message_comments.insert(id, unescape(&cap[2]));
                return;
            }
        } else if let Some(cap) = NODE_COMMENT_RE.captures(record) {
            self.node_comments.insert(cap[1].to_string(), unescape(&cap[2]));
            return;
        } else if ENV_COMMENT_RE.is_match(record) {
            // Environment variables are not modelled
            return;
        } else if let Some(cap) = GLOBAL_COMMENT_RE.captures(record) {
            self.document.comment = unescape(&cap[1]);
            return;
        }

        self.skip(record);
    }

    fn value_descriptions(&mut self, line: &str) {
        let Some(cap) = VALUE_DESCRIPTIONS_RE.captures(line) else {
            return self.skip(line);
        };
        let Ok(id) = cap[1].parse::<u32>() else {
            return self.skip(line);
        };

        self.value_descriptions
            .entry((id, cap[2].to_string()))
            .or_default()
            .extend(value_pairs(&cap[3]));
    }

    fn value_table(&mut self, line: &str) {
        let Some(cap) = VALUE_TABLE_RE.captures(line) else {
            return self.skip(line);
        };

        self.document
            .value_tables
            .entry(cap[1].to_string())
            .or_default()
            .extend(value_pairs(&cap[2]));
    }

    fn attribute(&mut self, line: &str) {
        let Some(cap) = ATTRIBUTE_RE.captures(line) else {
            return self.skip(line);
        };
        let name = cap[1].to_string();
        let rest = cap[2].trim();

        let scope = rest.split_whitespace().next().unwrap_or_default();
        match scope {
            "BO_" => match MESSAGE_ATTRIBUTE_RE.captures(rest) {
                Some(scoped) => match scoped[1].parse::<u32>() {
                    Ok(id) => self.message_attributes.push((id, name, strip_quotes(&scoped[2]))),
                    Err(_) => self.skip(line),
                },
                None => self.skip(line),
            },
            "SG_" => match SIGNAL_ATTRIBUTE_RE.captures(rest) {
                Some(scoped) => match scoped[1].parse::<u32>() {
                    Ok(id) => self.signal_attributes.push((
                        id,
                        scoped[2].to_string(),
                        name,
                        strip_quotes(&scoped[3]),
                    )),
                    Err(_) => self.skip(line),
                },
                None => self.skip(line),
            },
            "BU_" => match NODE_ATTRIBUTE_RE.captures(rest) {
                Some(scoped) => {
                    self.node_attributes
                        .push((scoped[1].to_string(), name, strip_quotes(&scoped[2])))
                }
                None => self.skip(line),
            },
            _ => {
                self.document.attributes.insert(name, strip_quotes(rest));
            }
        }
    }

    /// Flush the open message and merge the collected cross-references
    fn finish(mut self) -> (DbcDocument, ParseReport) {
        self.flush_message();

        let mut document = self.document;
        let mut report = self.report;

        for message in &mut document.messages {
            if let Some(comment) = self.message_comments.remove(&message.id) {
                message.description = comment;
            }

            for signal in &mut message.signals {
                let key = (message.id, signal.name.clone());
                if let Some(comment) = self.signal_comments.remove(&key) {
                    signal.description = comment;
                }
                if let Some(values) = self.value_descriptions.remove(&key) {
                    signal.value_descriptions.extend(values);
                }
            }
        }

        for node in &mut document.nodes {
            if let Some(comment) = self.node_comments.remove(&node.name) {
                node.comment = comment;
            }
        }

        for (id, name, value) in self.message_attributes {
            match document.messages.iter_mut().find(|m| m.id == id) {
                Some(message) => {
                    message.attributes.insert(name, value);
                }
                None => report.unresolved_attributes += 1,
            }
        }

        for (id, signal_name, name, value) in self.signal_attributes {
            let signal = document
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .and_then(|m| m.signals.iter_mut().find(|s| s.name == signal_name));
            match signal {
                Some(signal) => {
                    signal.attributes.insert(name, value);
                }
                None => report.unresolved_attributes += 1,
            }
        }

        for (node_name, name, value) in self.node_attributes {
            match document.nodes.iter_mut().find(|n| n.name == node_name) {
                Some(node) => {
                    node.attributes.insert(name, value);
                }
                None => report.unresolved_attributes += 1,
            }
        }

        report.unresolved_comments =
            self.message_comments.len() + self.signal_comments.len() + self.node_comments.len();
        report.unresolved_value_descriptions = self.value_descriptions.len();

        let stats = document.stats();
        report.messages = stats.num_messages;
        report.signals = stats.num_signals;

        if report.unresolved() > 0 {
            log::warn!(
                "{} comments, {} value descriptions and {} attributes refer to unknown definitions",
                report.unresolved_comments,
                report.unresolved_value_descriptions,
                report.unresolved_attributes
            );
        }
        log::debug!("DBC parse finished: {:?}", report);

        (document, report)
    }
}
