//! SIMSERV line codec
//!
//! A frame is a sequence of ASCII fields, each one preceded by the `0xB6`
//! delimiter, terminated by a carriage return:
//!
//! ```text
//! B6 "10012" B6 "1" 0D
//! ```
//!
//! Replies from the chamber use the same separator but usually omit the
//! leading delimiter, so decoding accepts both shapes.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Field delimiter
pub const DELIM: u8 = 0xB6;

/// Frame terminator
pub const CR: u8 = 0x0D;

/// Codec error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A field to be sent contains a non-ASCII character
    #[error("Field {index} is not ASCII: {field:?}")]
    NonAsciiField {
        /// Position of the field in the frame
        index: usize,
        /// Offending field
        field: String,
    },

    /// A received payload contains a byte outside 7-bit ASCII
    #[error("Non-ASCII byte 0x{byte:02X} at offset {offset} in reply")]
    NonAsciiPayload {
        /// Offending byte
        byte: u8,
        /// Offset in the raw payload
        offset: usize,
    },

    /// Nothing was received
    #[error("Empty reply frame")]
    EmptyFrame,
}

/// Encode fields into a SIMSERV frame
pub fn encode<S: AsRef<str>>(fields: &[S]) -> Result<Bytes, ProtocolError> {
    let capacity = fields.iter().map(|f| f.as_ref().len() + 1).sum::<usize>() + 1;
    let mut buf = BytesMut::with_capacity(capacity);

    for (index, field) in fields.iter().enumerate() {
        let field = field.as_ref();
        if !field.is_ascii() {
            return Err(ProtocolError::NonAsciiField {
                index,
                field: field.to_string(),
            });
        }
        buf.put_u8(DELIM);
        buf.put_slice(field.as_bytes());
    }

    buf.put_u8(CR);
    Ok(buf.freeze())
}

/// Decode a SIMSERV frame into trimmed fields
pub fn decode(data: &[u8]) -> Result<Vec<String>, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }

    // Only the delimiter itself may fall outside 7-bit ASCII
    if let Some(offset) = data.iter().position(|&b| b != DELIM && !b.is_ascii()) {
        return Err(ProtocolError::NonAsciiPayload {
            byte: data[offset],
            offset,
        });
    }

    let body = data.strip_prefix(&[DELIM]).unwrap_or(data);

    Ok(body
        .split(|&b| b == DELIM)
        .map(|segment| String::from_utf8_lossy(segment).trim().to_string())
        .collect())
}

/// Render a raw frame for logs, delimiters shown as `|`
pub fn display(data: &[u8]) -> String {
    data.iter()
        .map(|&b| match b {
            DELIM => "|".to_string(),
            CR => "\\r".to_string(),
            0x20..=0x7e => (b as char).to_string(),
            _ => format!("\\x{:02x}", b),
        })
        .collect()
}
