//! Bit-level codec for CAN payloads
//!
//! Reads and writes bit fields using Vector DBC addressing. Bits are numbered
//! `byte * 8 + bit_in_byte`, where bit 0 is the least significant bit of byte 0.
//!
//! - Little-endian (Intel): the start bit is the LSB of the field and the field
//!   occupies consecutive increasing bit numbers.
//! - Big-endian (Motorola): the start bit is the MSB of the field. The field walks
//!   down towards bit 0 of its byte, then continues at bit 7 of the next byte.
//!
//! Bits that fall outside the payload read as zero and are never written.

use crate::signals::database::{ByteOrder, Signal, ValueType};
use crate::types::{DbcError, Result};

/// Widest field the codec can address
pub const MAX_FIELD_BITS: u16 = 64;

/// Mask covering the low `length` bits
pub fn field_mask(length: u16) -> u64 {
    match length {
        0 => 0,
        n if n >= MAX_FIELD_BITS => u64::MAX,
        n => (1u64 << n) - 1,
    }
}

/// Absolute bit numbers of a field, ordered from the LSB of the raw value to its MSB
fn field_bits(start_bit: u16, length: u16, byte_order: ByteOrder) -> Vec<usize> {
    let length = length.min(MAX_FIELD_BITS) as usize;
    let start = start_bit as usize;

    match byte_order {
        ByteOrder::LittleEndian => (start..start + length).collect(),
        ByteOrder::BigEndian => {
            // Walk MSB first, then reverse so index i holds value bit i
            let mut bits = Vec::with_capacity(length);
            let mut pos = start;
            for _ in 0..length {
                bits.push(pos);
                pos = if pos % 8 == 0 { pos + 15 } else { pos - 1 };
            }
            bits.reverse();
            bits
        }
    }
}

/// Read `length` bits (at most 64) starting at `start_bit` as an unsigned value
pub fn extract_raw(payload: &[u8], start_bit: u16, length: u16, byte_order: ByteOrder) -> u64 {
    let mut result: u64 = 0;

    for (value_bit, pos) in field_bits(start_bit, length, byte_order).into_iter().enumerate() {
        let byte_idx = pos / 8;
        let bit_in_byte = pos % 8;

        if let Some(byte) = payload.get(byte_idx) {
            let bit_value = (byte >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << value_bit;
        }
    }

    result
}

/// Write the low `length` bits of `raw` into `buffer`; other bits are left untouched
pub fn inject_raw(buffer: &mut [u8], start_bit: u16, length: u16, byte_order: ByteOrder, raw: u64) {
    for (value_bit, pos) in field_bits(start_bit, length, byte_order).into_iter().enumerate() {
        let byte_idx = pos / 8;
        let bit_in_byte = pos % 8;

        if let Some(byte) = buffer.get_mut(byte_idx) {
            if (raw >> value_bit) & 0x01 == 1 {
                *byte |= 1 << bit_in_byte;
            } else {
                *byte &= !(1 << bit_in_byte);
            }
        }
    }
}

/// Sign-extend a value from `length` bits to 64 bits
///
/// If the field's top bit is set, the upper bits are filled with 1s.
pub fn to_signed(raw: u64, length: u16) -> i64 {
    if length == 0 {
        return 0;
    }
    if length >= MAX_FIELD_BITS {
        return raw as i64;
    }

    let raw = raw & field_mask(length);
    let sign_bit = 1u64 << (length - 1);
    if raw & sign_bit != 0 {
        (raw | !field_mask(length)) as i64
    } else {
        raw as i64
    }
}

/// Raw integer of a signal, interpreted according to its value type
///
/// Unsigned 64-bit fields above `i64::MAX` wrap; use [`extract_raw`] when the full
/// unsigned range matters.
pub fn raw_value(payload: &[u8], signal: &Signal) -> i64 {
    let raw = extract_raw(payload, signal.start_bit, signal.length, signal.byte_order);
    match signal.value_type {
        ValueType::Signed => to_signed(raw, signal.length),
        ValueType::Unsigned => raw as i64,
    }
}

/// Physical value of a signal: `raw * factor + offset`
///
/// Returns `None` when the factor is zero.
pub fn decode(payload: &[u8], signal: &Signal) -> Option<f64> {
    if signal.factor == 0.0 {
        return None;
    }

    let raw = extract_raw(payload, signal.start_bit, signal.length, signal.byte_order);
    let raw = match signal.value_type {
        ValueType::Signed => to_signed(raw, signal.length) as f64,
        ValueType::Unsigned => raw as f64,
    };

    Some(raw * signal.factor + signal.offset)
}

/// Convert a physical value into the raw bit pattern of a signal
///
/// The scaled value is rounded to the nearest integer with ties away from zero,
/// then clamped to the range representable by the field.
pub fn encode(physical: f64, signal: &Signal) -> Result<u64> {
    if signal.length == 0 || signal.length > MAX_FIELD_BITS {
        return Err(DbcError::InvalidSignalDefinition(format!(
            "signal '{}' has length {} (expected 1..=64)",
            signal.name, signal.length
        )));
    }
    if signal.factor == 0.0 {
        return Err(DbcError::InvalidScaling {
            signal: signal.name.clone(),
        });
    }
    if !physical.is_finite() {
        return Err(DbcError::InvalidValue {
            signal: signal.name.clone(),
            value: physical,
        });
    }

    let scaled = ((physical - signal.offset) / signal.factor).round();
    let mask = field_mask(signal.length);

    let raw = match signal.value_type {
        ValueType::Unsigned => {
            if scaled <= 0.0 {
                0
            } else {
                // `as` saturates at u64::MAX
                (scaled as u64).min(mask)
            }
        }
        ValueType::Signed => {
            let min = i64::MIN >> (MAX_FIELD_BITS - signal.length);
            let max = !min;
            (scaled as i64).clamp(min, max) as u64 & mask
        }
    };

    Ok(raw)
}

/// Encode a physical value straight into `buffer` at the signal's position
pub fn encode_into(buffer: &mut [u8], physical: f64, signal: &Signal) -> Result<u64> {
    let raw = encode(physical, signal)?;
    inject_raw(buffer, signal.start_bit, signal.length, signal.byte_order, raw);
    Ok(raw)
}
