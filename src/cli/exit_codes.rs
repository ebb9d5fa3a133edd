//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::chamber::ChamberError;
use crate::core::cycle::CycleError;
use crate::core::lock::LockError;
use crate::core::protocol::ProtocolStatus;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Connection or reply timeout
    pub const TIMEOUT: u8 = 4;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Chamber reported an error status
    pub const PROTOCOL_ERROR: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Chamber busy or locked by another program
    pub const DEVICE_BUSY: u8 = 13;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Classify an error returned by a command
    pub fn from_error(err: &anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(classify)
            .unwrap_or(ExitCodes::ERROR);
        Self::Error(code, format!("{:#}", err))
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn classify(err: &(dyn std::error::Error + 'static)) -> Option<u8> {
    if let Some(err) = err.downcast_ref::<CycleError>() {
        return match err.cause() {
            CycleError::Cancelled => Some(ExitCodes::CANCELLED),
            CycleError::InvalidProgram(_) => Some(ExitCodes::INVALID_ARGS),
            CycleError::Chamber(e) | CycleError::StopFailed(e) => classify(e),
            CycleError::Interrupted { .. } => None,
        };
    }
    if let Some(err) = err.downcast_ref::<ChamberError>() {
        return match err {
            ChamberError::Transport(e) => classify(e),
            ChamberError::Protocol { status, .. } => Some(match status {
                ProtocolStatus::ChamberNotPresent => ExitCodes::CONNECTION_FAILED,
                _ => ExitCodes::PROTOCOL_ERROR,
            }),
            ChamberError::MissingField { .. } | ChamberError::InvalidValue { .. } => {
                Some(ExitCodes::PROTOCOL_ERROR)
            }
            ChamberError::InvalidArguments(_) => Some(ExitCodes::INVALID_ARGS),
        };
    }
    if let Some(err) = err.downcast_ref::<TransportError>() {
        return Some(match err {
            TransportError::ConnectionFailed(_) => ExitCodes::CONNECTION_FAILED,
            TransportError::Timeout(_) | TransportError::ReadTimeout(_) => ExitCodes::TIMEOUT,
            TransportError::Protocol(_) => ExitCodes::PROTOCOL_ERROR,
            TransportError::IoError(_) => ExitCodes::ERROR,
        });
    }
    if let Some(err) = err.downcast_ref::<LockError>() {
        return Some(match err {
            LockError::Held(_) => ExitCodes::DEVICE_BUSY,
            LockError::Io { .. } => ExitCodes::ERROR,
        });
    }
    if let Some(err) = err.downcast_ref::<ConfigError>() {
        return Some(match err {
            ConfigError::TemperatureOutOfRange { .. } => ExitCodes::INVALID_ARGS,
            _ => ExitCodes::CONFIG_ERROR,
        });
    }
    None
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Connection timeout",
        8 => "Configuration error",
        9 => "Protocol error",
        11 => "Operation cancelled",
        13 => "Chamber busy",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 8, 9, 11, 13] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lock::LockHolder;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_transport_errors() {
        let err = anyhow::Error::new(ChamberError::from(TransportError::ConnectionFailed(
            "localhost:2049: refused".into(),
        )));
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::CONNECTION_FAILED);

        let err = anyhow::Error::new(ChamberError::from(TransportError::ReadTimeout(10)));
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::TIMEOUT);
    }

    #[test]
    fn test_protocol_errors() {
        let absent = ChamberError::Protocol {
            command: "11001".into(),
            status: ProtocolStatus::ChamberNotPresent,
            reply: vec!["-4".into()],
        };
        let err = anyhow::Error::new(absent);
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::CONNECTION_FAILED);

        let wrong = ChamberError::Protocol {
            command: "11001".into(),
            status: ProtocolStatus::InvalidParameters,
            reply: vec!["-6".into()],
        };
        let err = anyhow::Error::new(wrong).context("set-temp failed");
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::PROTOCOL_ERROR);
        assert!(CliResult::from_error(&err).message().unwrap().starts_with("set-temp failed"));
    }

    #[test]
    fn test_cycle_errors() {
        let err = anyhow::Error::new(CycleError::Cancelled);
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::CANCELLED);

        let interrupted = CycleError::Interrupted {
            cause: Box::new(CycleError::Cancelled),
            stop: ChamberError::from(TransportError::ConnectionFailed("gone".into())),
        };
        let err = anyhow::Error::new(interrupted);
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::CANCELLED);

        let err = anyhow::Error::new(CycleError::StopFailed(ChamberError::from(
            TransportError::Timeout(10),
        )));
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::TIMEOUT);
    }

    #[test]
    fn test_lock_and_config_errors() {
        let held = LockError::Held(LockHolder {
            pid: 42,
            program: "cycle".into(),
        });
        assert_eq!(CliResult::from_error(&anyhow::Error::new(held)).code(), ExitCodes::DEVICE_BUSY);

        let err = anyhow::Error::new(ConfigError::UnknownChamber("x".into()));
        assert_eq!(CliResult::from_error(&err).code(), ExitCodes::CONFIG_ERROR);

        assert_eq!(CliResult::from_error(&anyhow::anyhow!("other")).code(), ExitCodes::ERROR);
    }
}
