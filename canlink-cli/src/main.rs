//! canlink CLI Application
//!
//! Command-line front end for the canlink-dbc library:
//! - Inspect DBC files and their parse diagnostics
//! - Decode candump-style frame logs
//! - Encode physical values into payloads
//! - Re-export DBC files and apply JSON edit batches

use anyhow::{anyhow, Context, Result};
use canlink_dbc::{Command, MessageDecoder};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

mod config;
mod context;
mod frames;
mod report;

use config::{AppConfig, OutputFormat};
use context::AppContext;

/// canlink - Work with CAN DBC databases and frames
#[derive(Parser, Debug)]
#[command(name = "canlink")]
#[command(about = "Parse, edit and apply CAN DBC signal databases", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Output format (overrides the configuration file)
    #[arg(short, long, value_enum, global = true)]
    format: Option<OutputFormat>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print statistics and parse diagnostics of DBC files
    Inspect {
        /// DBC file(s) to load (can be repeated)
        #[arg(long, value_name = "FILE")]
        dbc: Vec<PathBuf>,
    },

    /// Decode candump-style frames (`(ts) iface 123#DEADBEEF`)
    Decode {
        #[arg(long, value_name = "FILE")]
        dbc: Vec<PathBuf>,

        /// Frame log to read (default: stdin)
        #[arg(long, value_name = "FILE")]
        frames: Option<PathBuf>,

        /// Maximum number of frames to decode
        #[arg(long, value_name = "COUNT")]
        max_frames: Option<usize>,
    },

    /// Build a payload from physical signal values
    Encode {
        #[arg(long, value_name = "FILE")]
        dbc: Vec<PathBuf>,

        /// Message id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_id)]
        id: u32,

        /// Signal value as Name=value (can be repeated)
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        set: Vec<(String, f64)>,
    },

    /// Parse DBC files and write them back out as one file
    Export {
        #[arg(long, value_name = "FILE")]
        dbc: Vec<PathBuf>,

        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Apply a JSON batch of edit and transmit commands
    Apply {
        #[arg(long, value_name = "FILE")]
        dbc: Vec<PathBuf>,

        /// JSON file holding a command object or an array of commands
        #[arg(long, value_name = "FILE")]
        commands: PathBuf,

        /// Where to save the edited document
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("canlink CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using canlink-dbc library v{}", canlink_dbc::VERSION);

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(format) = args.format {
        config.output.format = format;
    }
    let ctx = AppContext::new(config);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &args.command {
        Commands::Inspect { dbc } => run_inspect(&ctx, dbc, &mut out),
        Commands::Decode {
            dbc,
            frames,
            max_frames,
        } => run_decode(&ctx, dbc, frames.as_deref(), *max_frames, &mut out),
        Commands::Encode { dbc, id, set } => run_encode(&ctx, dbc, *id, set, &mut out),
        Commands::Export { dbc, out: target } => run_export(&ctx, dbc, target),
        Commands::Apply {
            dbc,
            commands,
            out: target,
        } => run_apply(&ctx, dbc, commands, target.as_deref(), &mut out),
    }
}

fn run_inspect<W: Write>(ctx: &AppContext, dbc: &[PathBuf], out: &mut W) -> Result<()> {
    let reports = ctx.load_dbc_files(dbc)?;
    let stats = ctx.decoder.database_stats();
    report::write_inspection(out, &stats, &reports, ctx.output_format())
}

fn run_decode<W: Write>(
    ctx: &AppContext,
    dbc: &[PathBuf],
    frames_path: Option<&Path>,
    max_frames: Option<usize>,
    out: &mut W,
) -> Result<()> {
    ctx.load_dbc_files(dbc)?;

    let lines: Vec<String> = match frames_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read frame log: {:?}", path))?
            .lines()
            .map(String::from)
            .collect(),
        None => io::stdin().lock().lines().collect::<io::Result<_>>()?,
    };

    let mut frames = Vec::new();
    for (number, line) in lines.iter().enumerate() {
        match frames::parse_line(line) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => {}
            Err(e) => log::warn!("Line {}: {}", number + 1, e),
        }
        if max_frames.is_some_and(|max| frames.len() >= max) {
            break;
        }
    }
    log::info!("Decoding {} frames", frames.len());

    // One snapshot for the whole log
    let document = ctx.decoder.document();
    let config = ctx.decoder.config();
    let events: Vec<_> = frames
        .par_iter()
        .filter_map(|frame| MessageDecoder::decode_event(frame, &document, config))
        .collect();

    for event in &events {
        report::write_event(out, event, ctx.output_format())?;
    }
    log::info!("{} of {} frames produced events", events.len(), frames.len());
    Ok(())
}

fn run_encode<W: Write>(
    ctx: &AppContext,
    dbc: &[PathBuf],
    id: u32,
    set: &[(String, f64)],
    out: &mut W,
) -> Result<()> {
    ctx.load_dbc_files(dbc)?;
    let document = ctx.decoder.document();

    let message = document
        .message(id)
        .or_else(|| document.message_for_frame(id, true))
        .ok_or_else(|| anyhow!("No message with id 0x{:X}", id))?;

    let values: BTreeMap<String, f64> = set.iter().cloned().collect();
    let frame = MessageDecoder::encode_message(message, &values);
    report::write_encoded(out, &frame, ctx.output_format())
}

fn run_export(ctx: &AppContext, dbc: &[PathBuf], target: &Path) -> Result<()> {
    ctx.load_dbc_files(dbc)?;
    ctx.decoder
        .export_dbc(target)
        .with_context(|| format!("Failed to write DBC file: {:?}", target))?;
    log::info!("DBC written to {:?}", target);
    Ok(())
}

fn run_apply<W: Write>(
    ctx: &AppContext,
    dbc: &[PathBuf],
    commands_path: &Path,
    target: Option<&Path>,
    out: &mut W,
) -> Result<()> {
    ctx.load_dbc_files(dbc)?;

    let json = fs::read_to_string(commands_path)
        .with_context(|| format!("Failed to read commands file: {:?}", commands_path))?;
    let commands = Command::parse_batch(&json)
        .with_context(|| format!("Failed to parse commands file: {:?}", commands_path))?;

    let outcome = ctx.decoder.apply_commands(&commands);
    report::write_outcome(out, &outcome, ctx.output_format())?;
    log::info!(
        "{} commands applied, {} failed",
        outcome.results.len() - outcome.failures(),
        outcome.failures()
    );

    if let Some(target) = target {
        ctx.decoder
            .export_dbc(target)
            .with_context(|| format!("Failed to write DBC file: {:?}", target))?;
        log::info!("Edited DBC written to {:?}", target);
    }
    Ok(())
}

/// Accept `256`, `0x100` or `0X100`
fn parse_id(text: &str) -> std::result::Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid id '{}': {}", text, e))
}

fn parse_assignment(text: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("256"), Ok(256));
        assert_eq!(parse_id("0x100"), Ok(0x100));
        assert_eq!(parse_id("0X18DAF110"), Ok(0x18DA_F110));
        assert!(parse_id("0xZZ").is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("Speed=120.5"), Ok(("Speed".to_string(), 120.5)));
        assert_eq!(parse_assignment("Temp = -4"), Ok(("Temp".to_string(), -4.0)));
        assert!(parse_assignment("Speed").is_err());
        assert!(parse_assignment("Speed=fast").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_decode_subcommand_reads_log() {
        let mut dbc = tempfile::NamedTempFile::new().unwrap();
        writeln!(dbc, "BO_ 256 Status: 1 Vector__XXX\n SG_ Level : 0|8@1+ (1,0) [0|255] \"\" Vector__XXX").unwrap();
        let mut log = tempfile::NamedTempFile::new().unwrap();
        writeln!(log, "(0.000100) can0 100#2A\nnot a frame\n(0.000200) can0 101#00").unwrap();

        let ctx = AppContext::new(AppConfig::default());
        let mut out = Vec::new();
        run_decode(&ctx, &[dbc.path().to_path_buf()], Some(log.path()), None, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("0x100 Status"));
        assert!(text.contains("Level = 42"));
        assert!(!text.contains("101#"));
    }

    #[test]
    fn test_apply_subcommand_saves_document() {
        let mut dbc = tempfile::NamedTempFile::new().unwrap();
        writeln!(dbc, "BO_ 256 Status: 1 Vector__XXX").unwrap();
        let mut commands = tempfile::NamedTempFile::new().unwrap();
        write!(commands, r#"{{"type": "update_message", "id": 256, "name": "Renamed"}}"#).unwrap();
        let target = tempfile::NamedTempFile::new().unwrap();

        let ctx = AppContext::new(AppConfig::default());
        let mut out = Vec::new();
        run_apply(
            &ctx,
            &[dbc.path().to_path_buf()],
            commands.path(),
            Some(target.path()),
            &mut out,
        )
        .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "#0 update_message: ok\n");
        let saved = fs::read_to_string(target.path()).unwrap();
        assert!(saved.contains("BO_ 256 Renamed: 1 Vector__XXX"));
    }
}
