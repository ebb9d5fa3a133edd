//! Command and response frames

use super::codes::{CommandCode, ProtocolStatus};
use super::simserv::{self, ProtocolError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outgoing frame: command code, chamber id, parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    fields: Vec<String>,
}

impl CommandFrame {
    /// Build a frame for a known command addressed to `chamber_id`
    pub fn new(code: CommandCode, chamber_id: u32) -> Self {
        let mut fields = vec![code.as_wire()];
        if code.has_leading_index() {
            fields.push("1".to_string());
        }
        fields.push(chamber_id.to_string());
        Self { fields }
    }

    /// Build a frame from caller supplied fields, sent verbatim
    pub fn raw<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a parameter
    #[must_use]
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.fields.push(value.to_string());
        self
    }

    /// Fields in wire order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Command field
    pub fn code(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        simserv::encode(&self.fields)
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(" "))
    }
}

/// Incoming frame: status code followed by payload
///
/// Serializes as the plain field list; deserializing goes through
/// [`ResponseFrame::new`] so the status field is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ResponseFrame {
    fields: Vec<String>,
}

impl ResponseFrame {
    /// Wrap decoded fields; at least the status field is required
    pub fn new(fields: Vec<String>) -> Result<Self, ProtocolError> {
        if fields.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        Ok(Self { fields })
    }

    /// Decode a raw reply
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::new(simserv::decode(data)?)
    }

    /// Status field, parsed
    pub fn status(&self) -> ProtocolStatus {
        ProtocolStatus::from_wire(&self.fields[0])
    }

    /// Field by position
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Payload fields after the status
    pub fn payload(&self) -> &[String] {
        &self.fields[1..]
    }

    /// All fields
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Consume into fields
    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

impl TryFrom<Vec<String>> for ResponseFrame {
    type Error = ProtocolError;

    fn try_from(fields: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(fields)
    }
}

impl From<ResponseFrame> for Vec<String> {
    fn from(frame: ResponseFrame) -> Self {
        frame.fields
    }
}

impl fmt::Display for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(" "))
    }
}
