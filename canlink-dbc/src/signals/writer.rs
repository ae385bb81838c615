//! DBC serializer
//!
//! Writes a document back out as DBC text that the parser in [`super::dbc`] reads
//! into an equivalent document. Attributes are declared as `STRING` since the
//! document stores every attribute value as text.

use crate::signals::database::{DbcDocument, Message, Signal, NO_NODE};
use crate::types::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::path::Path;

const NEW_SYMBOLS: &[&str] = &[
    "NS_DESC_",
    "CM_",
    "BA_DEF_",
    "BA_",
    "VAL_",
    "BA_DEF_DEF_",
    "VAL_TABLE_",
    "BO_TX_BU_",
    "SIG_VALTYPE_",
];

/// Render a document as DBC text
pub fn write_dbc(document: &DbcDocument) -> String {
    document.to_string()
}

/// Write a document to a `.dbc` file
pub fn save_dbc_file(path: &Path, document: &DbcDocument) -> Result<()> {
    log::info!("Writing DBC file: {:?}", path);
    std::fs::write(path, write_dbc(document))?;
    Ok(())
}

struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        for c in self.0.chars() {
            if c == '"' || c == '\\' {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        f.write_char('"')
    }
}

fn write_value_pairs(f: &mut fmt::Formatter<'_>, values: &BTreeMap<i64, String>) -> fmt::Result {
    for (value, label) in values {
        write!(f, " {} {}", value, Quoted(label))?;
    }
    Ok(())
}

fn write_signal(f: &mut fmt::Formatter<'_>, signal: &Signal) -> fmt::Result {
    write!(f, " SG_ {}", signal.name)?;
    if let Some(mux) = signal.multiplexer {
        write!(f, " {}", mux)?;
    }

    let receivers = if signal.receivers.is_empty() {
        NO_NODE.to_string()
    } else {
        signal.receivers.iter().cloned().collect::<Vec<_>>().join(",")
    };

    writeln!(
        f,
        " : {}|{}@{}{} ({},{}) [{}|{}] {} {}",
        signal.start_bit,
        signal.length,
        signal.byte_order.dbc_digit(),
        signal.value_type.dbc_sign(),
        signal.factor,
        signal.offset,
        signal.min,
        signal.max,
        Quoted(&signal.unit),
        receivers
    )
}

fn write_message(f: &mut fmt::Formatter<'_>, message: &Message) -> fmt::Result {
    let transmitter = if message.transmitter.is_empty() {
        NO_NODE
    } else {
        message.transmitter.as_str()
    };
    writeln!(f, "BO_ {} {}: {} {}", message.id, message.name, message.length, transmitter)?;
    for signal in &message.signals {
        write_signal(f, signal)?;
    }
    writeln!(f)
}

fn write_comments(f: &mut fmt::Formatter<'_>, document: &DbcDocument) -> fmt::Result {
    if !document.comment.is_empty() {
        writeln!(f, "CM_ {};", Quoted(&document.comment))?;
    }
    for node in document.nodes.iter().filter(|n| !n.comment.is_empty()) {
        writeln!(f, "CM_ BU_ {} {};", node.name, Quoted(&node.comment))?;
    }
    for message in &document.messages {
        if !message.description.is_empty() {
            writeln!(f, "CM_ BO_ {} {};", message.id, Quoted(&message.description))?;
        }
        for signal in message.signals.iter().filter(|s| !s.description.is_empty()) {
            writeln!(
                f,
                "CM_ SG_ {} {} {};",
                message.id,
                signal.name,
                Quoted(&signal.description)
            )?;
        }
    }
    Ok(())
}

fn write_attributes(f: &mut fmt::Formatter<'_>, document: &DbcDocument) -> fmt::Result {
    let mut definitions: BTreeSet<(&str, &str)> = BTreeSet::new();
    definitions.extend(document.attributes.keys().map(|name| ("", name.as_str())));
    for node in &document.nodes {
        definitions.extend(node.attributes.keys().map(|name| ("BU_ ", name.as_str())));
    }
    for message in &document.messages {
        definitions.extend(message.attributes.keys().map(|name| ("BO_ ", name.as_str())));
        for signal in &message.signals {
            definitions.extend(signal.attributes.keys().map(|name| ("SG_ ", name.as_str())));
        }
    }

    for (scope, name) in &definitions {
        writeln!(f, "BA_DEF_ {}{} STRING ;", scope, Quoted(name))?;
    }

    for (name, value) in &document.attributes {
        writeln!(f, "BA_ {} {};", Quoted(name), Quoted(value))?;
    }
    for node in &document.nodes {
        for (name, value) in &node.attributes {
            writeln!(f, "BA_ {} BU_ {} {};", Quoted(name), node.name, Quoted(value))?;
        }
    }
    for message in &document.messages {
        for (name, value) in &message.attributes {
            writeln!(f, "BA_ {} BO_ {} {};", Quoted(name), message.id, Quoted(value))?;
        }
        for signal in &message.signals {
            for (name, value) in &signal.attributes {
                writeln!(
                    f,
                    "BA_ {} SG_ {} {} {};",
                    Quoted(name),
                    message.id,
                    signal.name,
                    Quoted(value)
                )?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for DbcDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VERSION {}", Quoted(&self.version))?;
        writeln!(f)?;
        writeln!(f)?;

        writeln!(f, "NS_ :")?;
        for symbol in NEW_SYMBOLS {
            writeln!(f, "\t{}", symbol)?;
        }
        writeln!(f)?;
        writeln!(f, "BS_:")?;
        writeln!(f)?;

        let nodes: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        if nodes.is_empty() {
            writeln!(f, "BU_:")?;
        } else {
            writeln!(f, "BU_: {}", nodes.join(" "))?;
        }
        writeln!(f)?;

        for (name, values) in &self.value_tables {
            write!(f, "VAL_TABLE_ {}", name)?;
            write_value_pairs(f, values)?;
            writeln!(f, " ;")?;
        }
        if !self.value_tables.is_empty() {
            writeln!(f)?;
        }

        for message in &self.messages {
            write_message(f, message)?;
        }

        write_comments(f, self)?;
        write_attributes(f, self)?;

        for message in &self.messages {
            for signal in message.signals.iter().filter(|s| !s.value_descriptions.is_empty()) {
                write!(f, "VAL_ {} {}", message.id, signal.name)?;
                write_value_pairs(f, &signal.value_descriptions)?;
                writeln!(f, " ;")?;
            }
        }

        Ok(())
    }
}
