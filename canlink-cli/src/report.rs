//! Output rendering for the subcommands
//!
//! Every writer takes the output format from the configuration: `txt` is meant
//! for people, `json` writes one JSON object per line.

use crate::config::OutputFormat;
use crate::frames::format_frame;
use anyhow::Result;
use canlink_dbc::{CommandEffect, DatabaseStats, DecodedEvent, EditOutcome, EncodedFrame, ParseReport};
use chrono::SecondsFormat;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

/// Document statistics plus one diagnostics line per loaded file
pub fn write_inspection<W: Write>(
    out: &mut W,
    stats: &DatabaseStats,
    reports: &[(PathBuf, ParseReport)],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Txt => {
            writeln!(out, "Signal Database:")?;
            writeln!(out, "  Nodes:        {}", stats.num_nodes)?;
            writeln!(out, "  Messages:     {}", stats.num_messages)?;
            writeln!(out, "  Signals:      {}", stats.num_signals)?;
            writeln!(out, "  Value tables: {}", stats.num_value_tables)?;
            for (path, report) in reports {
                writeln!(
                    out,
                    "{}: {} messages, {} signals decoded, {} skipped, {} duplicates, {} unresolved",
                    path.display(),
                    report.messages,
                    report.signals,
                    report.skipped_records,
                    report.duplicate_definitions,
                    report.unresolved()
                )?;
            }
        }
        OutputFormat::Json => {
            let files: Vec<_> = reports
                .iter()
                .map(|(path, report)| json!({ "path": path, "report": report }))
                .collect();
            serde_json::to_writer(&mut *out, &json!({ "stats": stats, "files": files }))?;
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn write_event<W: Write>(out: &mut W, event: &DecodedEvent, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        serde_json::to_writer(&mut *out, event)?;
        writeln!(out)?;
        return Ok(());
    }

    let timestamp = event.timestamp().to_rfc3339_opts(SecondsFormat::Micros, true);
    match event {
        DecodedEvent::Message {
            can_id,
            message_name,
            signals,
            ..
        } => {
            writeln!(out, "{} 0x{:X} {}", timestamp, can_id, message_name)?;
            for signal in signals {
                writeln!(out, "    {} = {}", signal.name(), signal.formatted)?;
            }
        }
        DecodedEvent::RawFrame {
            can_id,
            is_extended,
            data,
            ..
        } => {
            writeln!(out, "{} {} (no definition)", timestamp, format_frame(*can_id, *is_extended, data))?;
        }
    }
    Ok(())
}

pub fn write_encoded<W: Write>(out: &mut W, frame: &EncodedFrame, format: OutputFormat) -> Result<()> {
    let text = format_frame(frame.can_id, frame.is_extended, &frame.data);
    match format {
        OutputFormat::Txt => {
            writeln!(out, "{}", text)?;
            for failure in &frame.failures {
                writeln!(out, "    not encoded: {}: {}", failure.signal, failure.error)?;
            }
        }
        OutputFormat::Json => {
            let failures: Vec<_> = frame
                .failures
                .iter()
                .map(|f| json!({ "signal": f.signal, "error": f.error.to_string() }))
                .collect();
            let value = json!({
                "can_id": frame.can_id,
                "is_extended": frame.is_extended,
                "data": frame.data,
                "frame": text,
                "failures": failures,
            });
            serde_json::to_writer(&mut *out, &value)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// One line per command result
pub fn write_outcome<W: Write>(out: &mut W, outcome: &EditOutcome, format: OutputFormat) -> Result<()> {
    for result in &outcome.results {
        match format {
            OutputFormat::Txt => match &result.outcome {
                Ok(CommandEffect::DocumentChanged) => {
                    writeln!(out, "#{} {}: ok", result.index, result.kind)?
                }
                Ok(CommandEffect::Transmit(frame)) => writeln!(
                    out,
                    "#{} {}: {}",
                    result.index,
                    result.kind,
                    format_frame(frame.can_id, frame.is_extended, &frame.data)
                )?,
                Err(e) => writeln!(out, "#{} {}: error: {}", result.index, result.kind, e)?,
            },
            OutputFormat::Json => {
                let mut value = json!({ "index": result.index, "type": result.kind });
                match &result.outcome {
                    Ok(CommandEffect::DocumentChanged) => value["status"] = json!("ok"),
                    Ok(CommandEffect::Transmit(frame)) => {
                        value["status"] = json!("ok");
                        value["frame"] = json!(format_frame(frame.can_id, frame.is_extended, &frame.data));
                    }
                    Err(e) => {
                        value["status"] = json!("error");
                        value["error"] = json!(e.to_string());
                    }
                }
                serde_json::to_writer(&mut *out, &value)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}
