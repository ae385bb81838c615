//! Application context
//!
//! Built once in `main` and handed to every subcommand. Holds the loaded
//! configuration and the decoder that owns the active document.

use crate::config::{AppConfig, OutputFormat};
use anyhow::{bail, Context, Result};
use canlink_dbc::signals::load_dbc_file;
use canlink_dbc::{DbcDocument, Decoder, ParseReport};
use std::path::{Path, PathBuf};

pub struct AppContext {
    pub config: AppConfig,
    pub decoder: Decoder,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let decoder = Decoder::with_config(config.decoder.clone());
        Self { config, decoder }
    }

    pub fn output_format(&self) -> OutputFormat {
        self.config.output.format
    }

    /// Load DBC files, falling back to `[input] dbc_files` when `paths` is empty
    ///
    /// Several files are merged into one document; messages and nodes already
    /// defined by an earlier file win.
    pub fn load_dbc_files(&self, paths: &[PathBuf]) -> Result<Vec<(PathBuf, ParseReport)>> {
        let paths = if paths.is_empty() {
            self.config.input.dbc_files.as_slice()
        } else {
            paths
        };
        if paths.is_empty() {
            bail!("No DBC file given (use --dbc or [input] dbc_files in the config)");
        }

        let mut merged: Option<DbcDocument> = None;
        let mut reports = Vec::with_capacity(paths.len());

        for path in paths {
            let (document, report) = load(path)?;
            merged = Some(match merged {
                Some(mut into) => {
                    merge_documents(&mut into, document);
                    into
                }
                None => document,
            });
            reports.push((path.clone(), report));
        }

        if let Some(document) = merged {
            self.decoder.publish(document);
        }
        Ok(reports)
    }
}

fn load(path: &Path) -> Result<(DbcDocument, ParseReport)> {
    load_dbc_file(path).with_context(|| format!("Failed to load DBC file: {:?}", path))
}

fn merge_documents(into: &mut DbcDocument, other: DbcDocument) {
    for node in other.nodes {
        if into.node(&node.name).is_none() {
            into.nodes.push(node);
        }
    }
    for message in other.messages {
        if into.message(message.id).is_some() {
            log::warn!(
                "Message 0x{:X} ({}) already loaded from an earlier file, ignored",
                message.id,
                message.name
            );
            continue;
        }
        into.messages.push(message);
    }
    for (name, table) in other.value_tables {
        into.value_tables.entry(name).or_insert(table);
    }
    for (name, value) in other.attributes {
        into.attributes.entry(name).or_insert(value);
    }
    if into.comment.is_empty() {
        into.comment = other.comment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dbc_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_merges_multiple_files() {
        let first = dbc_file("BU_: A\nBO_ 100 First: 8 A\n SG_ X : 0|8@1+ (1,0) [0|255] \"\" A\n");
        let second = dbc_file("BU_: A B\nBO_ 100 Clash: 8 B\nBO_ 200 Second: 4 B\n");

        let ctx = AppContext::new(AppConfig::default());
        let reports = ctx
            .load_dbc_files(&[first.path().to_path_buf(), second.path().to_path_buf()])
            .unwrap();
        assert_eq!(reports.len(), 2);

        let doc = ctx.decoder.document();
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.messages.len(), 2);
        assert_eq!(doc.message(100).unwrap().name, "First");
    }

    #[test]
    fn test_falls_back_to_config_files() {
        let file = dbc_file("BO_ 1 Only: 1 Vector__XXX\n");
        let mut config = AppConfig::default();
        config.input.dbc_files.push(file.path().to_path_buf());

        let ctx = AppContext::new(config);
        ctx.load_dbc_files(&[]).unwrap();
        assert!(ctx.decoder.document().message(1).is_some());
    }

    #[test]
    fn test_no_files_is_error() {
        let ctx = AppContext::new(AppConfig::default());
        assert!(ctx.load_dbc_files(&[]).is_err());
        assert!(ctx
            .load_dbc_files(&[PathBuf::from("/nonexistent/bus.dbc")])
            .is_err());
    }
}
