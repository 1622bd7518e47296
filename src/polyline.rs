// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Codec for the [encoded polyline](https://developers.google.com/maps/documentation/utilities/polylinealgorithm)
//! format, as used by routing services to transmit route shapes.

use crate::Point;

/// Number of decimal digits used by [Valhalla](https://valhalla.github.io/valhalla/decoding/) shapes.
pub const VALHALLA_PRECISION: u32 = 6;

/// Number of decimal digits used by the original Google format.
pub const GOOGLE_PRECISION: u32 = 5;

/// Error conditions which may occur when decoding an encoded polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolylineError {
    /// A byte outside of the `'?'..='~'` range was encountered.
    #[error("invalid byte {byte:#04x} at offset {offset}")]
    InvalidByte { offset: usize, byte: u8 },

    /// The input ended in the middle of a value, or contained
    /// a latitude without its longitude.
    #[error("unexpected end of input")]
    Truncated,

    /// A value has more continuation chunks than fit in 64 bits,
    /// or the running coordinate sum does not fit in 64 bits.
    #[error("value at offset {0} overflows")]
    Overflow(usize),
}

/// Decodes an encoded polyline with `precision` decimal digits into a sequence of [Points](Point).
pub fn decode(encoded: &str, precision: u32) -> Result<Vec<Point>, PolylineError> {
    let factor = 10_f64.powi(precision as i32);
    let bytes = encoded.as_bytes();

    let mut points = Vec::with_capacity(bytes.len() / 4);
    let mut offset = 0;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;

    while offset < bytes.len() {
        let start = offset;
        lat = lat
            .checked_add(read_value(bytes, &mut offset)?)
            .ok_or(PolylineError::Overflow(start))?;

        if offset >= bytes.len() {
            return Err(PolylineError::Truncated);
        }
        let start = offset;
        lon = lon
            .checked_add(read_value(bytes, &mut offset)?)
            .ok_or(PolylineError::Overflow(start))?;

        points.push(Point::new(lat as f64 / factor, lon as f64 / factor));
    }

    return Ok(points);
}

/// Reads a single zig-zag encoded, variable-length value starting at `offset`,
/// advancing `offset` past it.
fn read_value(bytes: &[u8], offset: &mut usize) -> Result<i64, PolylineError> {
    let start = *offset;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let &byte = bytes.get(*offset).ok_or(PolylineError::Truncated)?;
        if !(63..=126).contains(&byte) {
            return Err(PolylineError::InvalidByte {
                offset: *offset,
                byte,
            });
        }
        if shift > 60 {
            return Err(PolylineError::Overflow(start));
        }

        let chunk = (byte - 63) as u64;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        *offset += 1;

        if chunk < 0x20 {
            break;
        }
    }

    let value = (result >> 1) as i64;
    if result & 1 == 1 {
        Ok(!value)
    } else {
        Ok(value)
    }
}

/// Encodes a sequence of [Points](Point) as a polyline with `precision` decimal digits.
pub fn encode(points: &[Point], precision: u32) -> String {
    let factor = 10_f64.powi(precision as i32);
    let mut out = String::with_capacity(points.len() * 8);
    let mut prev_lat: i64 = 0;
    let mut prev_lon: i64 = 0;

    for p in points {
        let lat = (p.lat * factor).round() as i64;
        let lon = (p.lon * factor).round() as i64;
        write_value(&mut out, lat - prev_lat);
        write_value(&mut out, lon - prev_lon);
        prev_lat = lat;
        prev_lon = lon;
    }

    out
}

fn write_value(out: &mut String, value: i64) {
    let mut v = (value << 1) as u64;
    if value < 0 {
        v = !v;
    }

    while v >= 0x20 {
        out.push((((v & 0x1f) | 0x20) as u8 + 63) as char);
        v >>= 5;
    }
    out.push((v as u8 + 63) as char);
}
