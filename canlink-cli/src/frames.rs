//! candump-style frame text
//!
//! Reads lines like `(1700000000.123456) can0 123#DEADBEEF` and writes frames back
//! in the `<hexid>#<hexdata>` form. The timestamp and interface are optional.
//! Ids written with more than three hex digits are extended frames.

use canlink_dbc::CanFrame;
use thiserror::Error;

const MAX_STANDARD_ID: u32 = 0x7FF;
const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
const MAX_DATA_BYTES: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum FrameParseError {
    #[error("no '<id>#<data>' token in line")]
    MissingFrame,

    #[error("invalid CAN ID '{0}'")]
    InvalidId(String),

    #[error("CAN ID 0x{0:X} out of range")]
    IdOutOfRange(u32),

    #[error("invalid payload '{0}'")]
    InvalidData(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Parse one line; blank lines and `#`/`;` comments give `Ok(None)`
pub fn parse_line(line: &str) -> Result<Option<CanFrame>, FrameParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return Ok(None);
    }

    let mut timestamp_ns = 0;
    let mut frame_token = None;
    for token in line.split_whitespace() {
        if let Some(ts) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            timestamp_ns = parse_timestamp(ts)?;
        } else if token.contains('#') {
            frame_token = Some(token);
        }
    }

    let token = frame_token.ok_or(FrameParseError::MissingFrame)?;
    let (id_text, data_text) = token.split_once('#').ok_or(FrameParseError::MissingFrame)?;

    let can_id = u32::from_str_radix(id_text, 16)
        .map_err(|_| FrameParseError::InvalidId(id_text.to_string()))?;
    let is_extended = id_text.len() > 3;
    let max_id = if is_extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
    if can_id > max_id {
        return Err(FrameParseError::IdOutOfRange(can_id));
    }

    let data = parse_hex_bytes(data_text)?;

    Ok(Some(
        CanFrame::new(can_id, data)
            .with_extended(is_extended)
            .with_timestamp_ns(timestamp_ns),
    ))
}

fn parse_timestamp(text: &str) -> Result<u64, FrameParseError> {
    let invalid = || FrameParseError::InvalidTimestamp(text.to_string());

    let (secs, fraction) = text.split_once('.').unwrap_or((text, ""));
    if fraction.len() > 9 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let secs: u64 = secs.parse().map_err(|_| invalid())?;
    let nanos: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction).parse().map_err(|_| invalid())?
    };

    secs.checked_mul(1_000_000_000)
        .and_then(|ns| ns.checked_add(nanos))
        .ok_or_else(invalid)
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, FrameParseError> {
    let invalid = || FrameParseError::InvalidData(text.to_string());

    let digits: String = text.chars().filter(|&c| c != '.').collect();
    if digits.len() % 2 != 0 || digits.len() / 2 > MAX_DATA_BYTES {
        return Err(invalid());
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(invalid)
        })
        .collect()
}

/// `<hexid>#<hexdata>` with a 3-digit standard or 8-digit extended id
pub fn format_frame(can_id: u32, is_extended: bool, data: &[u8]) -> String {
    let data: String = data.iter().map(|b| format!("{:02X}", b)).collect();
    if is_extended {
        format!("{:08X}#{}", can_id, data)
    } else {
        format!("{:03X}#{}", can_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_candump_line() {
        let frame = parse_line("(1700000000.250000) can0 123#DEADBEEF").unwrap().unwrap();
        assert_eq!(frame.can_id, 0x123);
        assert!(!frame.is_extended);
        assert_eq!(frame.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(frame.timestamp_ns, 1_700_000_000_250_000_000);
    }

    #[test]
    fn test_bare_frame_and_extended_id() {
        let frame = parse_line("18DAF110#0102").unwrap().unwrap();
        assert!(frame.is_extended);
        assert_eq!(frame.can_id, 0x18DA_F110);
        assert_eq!(frame.timestamp_ns, 0);

        let empty = parse_line("vcan1 7FF#").unwrap().unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# recorded on bench"), Ok(None));
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(parse_line("can0 123 DEAD"), Err(FrameParseError::MissingFrame));
        assert!(matches!(parse_line("XYZ#00"), Err(FrameParseError::InvalidId(_))));
        assert_eq!(parse_line("800#00"), Err(FrameParseError::IdOutOfRange(0x800)));
        assert!(matches!(parse_line("123#ABC"), Err(FrameParseError::InvalidData(_))));
        assert!(matches!(parse_line("123#ZZ"), Err(FrameParseError::InvalidData(_))));
        assert!(matches!(
            parse_line("(abc) 123#00"),
            Err(FrameParseError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_format_frame() {
        assert_eq!(format_frame(0x12, false, &[0xB0, 0x04]), "012#B004");
        assert_eq!(format_frame(0x18DA_F110, true, &[]), "18DAF110#");

        let text = format_frame(0x123, false, &[1, 2, 3]);
        let frame = parse_line(&text).unwrap().unwrap();
        assert_eq!(frame.data, vec![1, 2, 3]);
    }
}
