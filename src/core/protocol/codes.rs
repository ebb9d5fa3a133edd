//! SIMSERV command identifiers and reply codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// SIMSERV command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandCode {
    /// Read the chamber state (10012)
    GetStatus = 10012,
    /// Write the nominal temperature (11001)
    SetNominalTemperature = 11001,
    /// Read the nominal temperature (11002)
    GetNominalTemperature = 11002,
    /// Read the actual temperature (11004)
    GetActualTemperature = 11004,
    /// Write a digital channel (14001)
    SetDigitalChannel = 14001,
    /// Read a digital channel (14003)
    GetDigitalChannel = 14003,
}

impl CommandCode {
    /// Get command code from its wire representation
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "10012" => Some(Self::GetStatus),
            "11001" => Some(Self::SetNominalTemperature),
            "11002" => Some(Self::GetNominalTemperature),
            "11004" => Some(Self::GetActualTemperature),
            "14001" => Some(Self::SetDigitalChannel),
            "14003" => Some(Self::GetDigitalChannel),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_wire(&self) -> String {
        (*self as u32).to_string()
    }

    /// Whether the command takes the extra `"1"` argument before the chamber id.
    ///
    /// The temperature commands are only accepted by the controller with this
    /// leading argument; it is undocumented vendor behavior.
    pub fn has_leading_index(&self) -> bool {
        matches!(
            self,
            Self::SetNominalTemperature | Self::GetNominalTemperature | Self::GetActualTemperature
        )
    }

    /// Get name of command
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetStatus => "get status",
            Self::SetNominalTemperature => "set nominal temperature",
            Self::GetNominalTemperature => "get nominal temperature",
            Self::GetActualTemperature => "get actual temperature",
            Self::SetDigitalChannel => "set digital channel",
            Self::GetDigitalChannel => "get digital channel",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as u32)
    }
}

/// Chamber state reported by the status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChamberStatus {
    /// Idle and ready for commands
    Available,
    /// Running
    Running,
    /// Running with a warning
    Warning,
    /// Stopped on an error
    Error,
    /// Code outside the documented set
    Unknown(String),
}

impl ChamberStatus {
    /// Parse the status field of a status reply
    pub fn from_wire(code: &str) -> Self {
        match code {
            "1" => Self::Available,
            "2" => Self::Running,
            "4" => Self::Warning,
            "8" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Check if the chamber accepts new work
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for ChamberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Running => write!(f, "run"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

/// Result code carried in the first field of every reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolStatus {
    /// 1
    Success,
    /// -1
    EmptyReceipt,
    /// -2
    MissingChamberId,
    /// -3
    ChamberIdOutOfRange,
    /// -4
    ChamberNotPresent,
    /// -5
    UnknownCommand,
    /// -6
    InvalidParameters,
    /// -7
    NoServer,
    /// -8
    ControlVariableNotFound,
    /// -9
    ExecutionFailed,
    /// -10
    IndexError,
    /// -11
    NotLoggedIn,
    /// -12
    NoPrivilege,
    /// -13
    DuplicateLogin,
    /// Anything else, kept verbatim
    Undefined(String),
}

impl ProtocolStatus {
    /// Parse the first reply field
    pub fn from_wire(code: &str) -> Self {
        match code.parse::<i32>() {
            Ok(1) => Self::Success,
            Ok(-1) => Self::EmptyReceipt,
            Ok(-2) => Self::MissingChamberId,
            Ok(-3) => Self::ChamberIdOutOfRange,
            Ok(-4) => Self::ChamberNotPresent,
            Ok(-5) => Self::UnknownCommand,
            Ok(-6) => Self::InvalidParameters,
            Ok(-7) => Self::NoServer,
            Ok(-8) => Self::ControlVariableNotFound,
            Ok(-9) => Self::ExecutionFailed,
            Ok(-10) => Self::IndexError,
            Ok(-11) => Self::NotLoggedIn,
            Ok(-12) => Self::NoPrivilege,
            Ok(-13) => Self::DuplicateLogin,
            _ => Self::Undefined(code.to_string()),
        }
    }

    /// Numeric code, when the reply carried a number
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Success => Some(1),
            Self::EmptyReceipt => Some(-1),
            Self::MissingChamberId => Some(-2),
            Self::ChamberIdOutOfRange => Some(-3),
            Self::ChamberNotPresent => Some(-4),
            Self::UnknownCommand => Some(-5),
            Self::InvalidParameters => Some(-6),
            Self::NoServer => Some(-7),
            Self::ControlVariableNotFound => Some(-8),
            Self::ExecutionFailed => Some(-9),
            Self::IndexError => Some(-10),
            Self::NotLoggedIn => Some(-11),
            Self::NoPrivilege => Some(-12),
            Self::DuplicateLogin => Some(-13),
            Self::Undefined(raw) => raw.parse().ok(),
        }
    }

    /// Check for success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Human readable meaning
    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::EmptyReceipt => "the receipt string was empty",
            Self::MissingChamberId => "missing chamber ID",
            Self::ChamberIdOutOfRange => "chamber ID is in an invalid range",
            Self::ChamberNotPresent => "chamber not present",
            Self::UnknownCommand => "unknown command ID",
            Self::InvalidParameters => "too few or incorrect parameters",
            Self::NoServer => "no server",
            Self::ControlVariableNotFound => "control variable with this ID not found",
            Self::ExecutionFailed => "error while executing the command",
            Self::IndexError => "index error while executing the command",
            Self::NotLoggedIn => "no user logged in (encrypted communication only)",
            Self::NoPrivilege => "the logged in user has no command execution privileges",
            Self::DuplicateLogin => "duplicate login",
            Self::Undefined(_) => "undefined error",
        }
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined(raw) => write!(f, "{} ({:?})", self.description(), raw),
            _ => write!(f, "{} ({})", self.description(), self.code().unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_wire() {
        assert_eq!(CommandCode::GetStatus.as_wire(), "10012");
        assert_eq!(CommandCode::from_wire("14003"), Some(CommandCode::GetDigitalChannel));
        assert_eq!(CommandCode::from_wire("99999"), None);
        assert!(CommandCode::GetActualTemperature.has_leading_index());
        assert!(!CommandCode::SetDigitalChannel.has_leading_index());
    }

    #[test]
    fn test_chamber_status() {
        assert_eq!(ChamberStatus::from_wire("1"), ChamberStatus::Available);
        assert_eq!(ChamberStatus::from_wire("2"), ChamberStatus::Running);
        assert_eq!(ChamberStatus::from_wire("4"), ChamberStatus::Warning);
        assert_eq!(ChamberStatus::from_wire("8"), ChamberStatus::Error);
        assert_eq!(ChamberStatus::from_wire("16"), ChamberStatus::Unknown("16".into()));
        assert_eq!(ChamberStatus::from_wire("16").to_string(), "unknown (16)");
    }

    #[test]
    fn test_protocol_status_table() {
        let table = [
            ("-1", "the receipt string was empty"),
            ("-2", "missing chamber ID"),
            ("-3", "chamber ID is in an invalid range"),
            ("-4", "chamber not present"),
            ("-5", "unknown command ID"),
            ("-6", "too few or incorrect parameters"),
            ("-7", "no server"),
            ("-8", "control variable with this ID not found"),
            ("-9", "error while executing the command"),
            ("-10", "index error while executing the command"),
            ("-11", "no user logged in (encrypted communication only)"),
            ("-12", "the logged in user has no command execution privileges"),
            ("-13", "duplicate login"),
        ];

        for (code, meaning) in table {
            let status = ProtocolStatus::from_wire(code);
            assert!(!status.is_success());
            assert_eq!(status.description(), meaning);
            assert_eq!(status.code().map(|c| c.to_string()).as_deref(), Some(code));
        }
    }

    #[test]
    fn test_protocol_status_undefined() {
        let status = ProtocolStatus::from_wire("-42");
        assert_eq!(status, ProtocolStatus::Undefined("-42".into()));
        assert_eq!(status.description(), "undefined error");
        assert_eq!(status.code(), Some(-42));

        let garbage = ProtocolStatus::from_wire("OK");
        assert_eq!(garbage.code(), None);
        assert_eq!(garbage.to_string(), "undefined error (\"OK\")");
    }

    #[test]
    fn test_protocol_status_success() {
        assert!(ProtocolStatus::from_wire("1").is_success());
        assert_eq!(ProtocolStatus::Success.to_string(), "success (1)");
    }
}
