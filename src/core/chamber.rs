//! Typed command facade for one climate chamber
//!
//! Maps chamber operations onto SIMSERV command frames and interprets the
//! status code carried in the first field of every reply.
//!
//! Mutating operations go through an availability gate: a busy chamber is
//! left alone unless the caller forces the operation.

use super::protocol::{ChamberStatus, CommandCode, CommandFrame, ProtocolStatus, ResponseFrame};
use super::transport::{TcpConfig, TcpTransport, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Digital channel switching the chamber on and off
pub const POWER_CHANNEL: u32 = 1;

/// Reply returned in place of a skipped operation
pub const SKIPPED_SENTINEL: &str = "0";

/// Chamber facade error types
#[derive(Error, Debug)]
pub enum ChamberError {
    /// Chamber could not be reached or the exchange failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Chamber answered with an error status
    #[error("{command}: {status}")]
    Protocol {
        /// Command that failed
        command: String,
        /// Status reported by the chamber
        status: ProtocolStatus,
        /// Full reply
        reply: Vec<String>,
    },

    /// Reply is missing an expected payload field
    #[error("{command}: reply has no field {index}")]
    MissingField {
        /// Command that was sent
        command: String,
        /// Missing position
        index: usize,
    },

    /// Payload field could not be interpreted
    #[error("{command}: unexpected value {value:?}")]
    InvalidValue {
        /// Command that was sent
        command: String,
        /// Offending value
        value: String,
    },

    /// Rejected before contacting the chamber
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ChamberError {
    /// Protocol status, if the chamber reported an error
    pub fn protocol_status(&self) -> Option<&ProtocolStatus> {
        match self {
            Self::Protocol { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Whether the chamber could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_unreachable())
    }
}

/// Addressing of one chamber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChamberSession {
    address: String,
    port: u16,
    id: u32,
}

impl ChamberSession {
    /// Create a new session description
    pub fn new(address: &str, port: u16, id: u32) -> Self {
        Self {
            address: address.to_string(),
            port,
            id,
        }
    }

    /// Host address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Chamber id
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for ChamberSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} #{}", self.address, self.port, self.id)
    }
}

/// Result of a gated operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Sent, with the chamber's reply
    Done(ResponseFrame),
    /// Not sent because the chamber was busy
    Skipped,
}

impl Outcome {
    /// Check if the operation was skipped
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Reply fields; a skipped operation yields the `["0"]` sentinel
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::Done(reply) => reply.fields().to_vec(),
            Self::Skipped => vec![SKIPPED_SENTINEL.to_string()],
        }
    }
}

/// Availability gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Go ahead
    Proceed,
    /// Leave the chamber alone
    Skip,
}

/// Command facade over a transport
pub struct Chamber<T: Transport = TcpTransport> {
    session: ChamberSession,
    transport: T,
}

impl Chamber<TcpTransport> {
    /// Create a facade talking TCP to `address:port`
    pub fn connect(address: &str, port: u16, id: u32) -> Self {
        Self::with_config(TcpConfig::new(address, port), id)
    }

    /// Create a facade from a full TCP configuration
    pub fn with_config(config: TcpConfig, id: u32) -> Self {
        let session = ChamberSession::new(&config.host, config.port, id);
        Self::new(session, TcpTransport::new(config))
    }
}

impl<T: Transport> Chamber<T> {
    /// Create a facade over any transport
    pub fn new(session: ChamberSession, transport: T) -> Self {
        Self { session, transport }
    }

    /// Get session
    pub fn session(&self) -> &ChamberSession {
        &self.session
    }

    /// Get transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn frame(&self, code: CommandCode) -> CommandFrame {
        CommandFrame::new(code, self.session.id)
    }

    async fn execute(&self, frame: CommandFrame) -> Result<ResponseFrame, ChamberError> {
        let reply = self.transport.exchange(&frame).await?;
        let status = reply.status();

        if status.is_success() {
            return Ok(reply);
        }

        let command = CommandCode::from_wire(frame.code().unwrap_or_default())
            .map_or_else(|| frame.to_string(), |c| c.to_string());
        tracing::error!("{}: {}", command, status.description());

        Err(ChamberError::Protocol {
            command,
            status,
            reply: reply.into_fields(),
        })
    }

    async fn query(&self, code: CommandCode) -> Result<String, ChamberError> {
        let reply = self.execute(self.frame(code)).await?;
        reply
            .field(1)
            .map(str::to_string)
            .ok_or_else(|| ChamberError::MissingField {
                command: code.to_string(),
                index: 1,
            })
    }

    async fn query_temperature(&self, code: CommandCode) -> Result<f64, ChamberError> {
        let value = self.query(code).await?;
        value.parse().map_err(|_| ChamberError::InvalidValue {
            command: code.to_string(),
            value,
        })
    }

    /// Send caller supplied fields verbatim: command code, chamber id, arguments
    pub async fn send_raw<S: AsRef<str>>(&self, fields: &[S]) -> Result<ResponseFrame, ChamberError> {
        if fields.len() < 2 {
            return Err(ChamberError::InvalidArguments(
                "a command needs at least a command code and a chamber id".to_string(),
            ));
        }
        self.execute(CommandFrame::raw(fields.iter().map(|f| f.as_ref().to_string()))).await
    }

    /// Get chamber status
    pub async fn status(&self) -> Result<ChamberStatus, ChamberError> {
        Ok(ChamberStatus::from_wire(&self.query(CommandCode::GetStatus).await?))
    }

    /// Check whether the chamber accepts new work
    pub async fn is_available(&self) -> Result<bool, ChamberError> {
        Ok(self.status().await?.is_available())
    }

    /// Get actual temperature
    pub async fn actual_temperature(&self) -> Result<f64, ChamberError> {
        self.query_temperature(CommandCode::GetActualTemperature).await
    }

    /// Get nominal temperature
    pub async fn nominal_temperature(&self) -> Result<f64, ChamberError> {
        self.query_temperature(CommandCode::GetNominalTemperature).await
    }

    /// Check availability before a mutating operation.
    ///
    /// A busy chamber yields [`Gate::Skip`] unless `force` is set. When forced
    /// and `stop_first` is set, the chamber is stopped to clear the busy
    /// condition before proceeding.
    pub async fn ensure_available(&self, action: &str, force: bool, stop_first: bool) -> Result<Gate, ChamberError> {
        if self.is_available().await? {
            return Ok(Gate::Proceed);
        }

        tracing::warn!("the climate chamber is currently busy");

        if !force {
            tracing::warn!("will not {}", action);
            return Ok(Gate::Skip);
        }

        tracing::warn!("forcing {}", action);
        if stop_first {
            self.stop().await?;
        }
        Ok(Gate::Proceed)
    }

    /// Set nominal temperature
    pub async fn set_nominal_temperature(&self, value: f64, force: bool) -> Result<Outcome, ChamberError> {
        if !value.is_finite() {
            return Err(ChamberError::InvalidArguments(format!("temperature {} is not finite", value)));
        }

        if self.ensure_available("set the temperature", force, true).await? == Gate::Skip {
            return Ok(Outcome::Skipped);
        }

        let frame = self.frame(CommandCode::SetNominalTemperature).arg(value);
        Ok(Outcome::Done(self.execute(frame).await?))
    }

    /// Get digital channel state
    pub async fn channel(&self, channel: u32) -> Result<bool, ChamberError> {
        let frame = self.frame(CommandCode::GetDigitalChannel).arg(channel);
        let reply = self.execute(frame).await?;
        let value = reply.field(1).ok_or_else(|| ChamberError::MissingField {
            command: CommandCode::GetDigitalChannel.to_string(),
            index: 1,
        })?;

        value
            .parse::<i64>()
            .map(|v| v != 0)
            .map_err(|_| ChamberError::InvalidValue {
                command: CommandCode::GetDigitalChannel.to_string(),
                value: value.to_string(),
            })
    }

    async fn write_channel(&self, channel: u32, value: u32) -> Result<ResponseFrame, ChamberError> {
        let frame = self.frame(CommandCode::SetDigitalChannel).arg(channel).arg(value);
        self.execute(frame).await
    }

    /// Set digital channel state
    pub async fn set_channel(&self, channel: u32, value: u32, force: bool) -> Result<Outcome, ChamberError> {
        if self.ensure_available("set the channel", force, false).await? == Gate::Skip {
            return Ok(Outcome::Skipped);
        }
        Ok(Outcome::Done(self.write_channel(channel, value).await?))
    }

    /// Start the chamber
    pub async fn start(&self, force: bool) -> Result<Outcome, ChamberError> {
        if self.ensure_available("start", force, true).await? == Gate::Skip {
            return Ok(Outcome::Skipped);
        }
        Ok(Outcome::Done(self.write_channel(POWER_CHANNEL, 1).await?))
    }

    /// Stop the chamber, unconditionally
    pub async fn stop(&self) -> Result<ResponseFrame, ChamberError> {
        self.write_channel(POWER_CHANNEL, 0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::scripted::{is_power_write, ScriptedTransport};
    use crate::core::transport::MockTransport;
    use mockall::Sequence;

    fn chamber(transport: ScriptedTransport) -> Chamber<ScriptedTransport> {
        Chamber::new(ChamberSession::new("chamber.lab", 2049, 1), transport)
    }

    fn reply(fields: &[&str]) -> ResponseFrame {
        ResponseFrame::new(fields.iter().map(|f| f.to_string()).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_available_status() {
        let chamber = chamber(ScriptedTransport::new().with_status("1"));
        assert!(chamber.is_available().await.unwrap());
        assert_eq!(chamber.status().await.unwrap(), ChamberStatus::Available);
        assert_eq!(chamber.transport().sent()[0], ["10012", "1"]);
    }

    #[tokio::test]
    async fn test_running_status() {
        let chamber = chamber(ScriptedTransport::new().with_status("2"));
        assert_eq!(chamber.status().await.unwrap(), ChamberStatus::Running);
        assert!(!chamber.is_available().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_status_degrades() {
        let chamber = chamber(ScriptedTransport::new().with_status("77"));
        assert_eq!(chamber.status().await.unwrap(), ChamberStatus::Unknown("77".into()));
    }

    #[tokio::test]
    async fn test_temperatures() {
        let chamber = chamber(ScriptedTransport::new().with_readings(&["21.37"]));
        assert_eq!(chamber.actual_temperature().await.unwrap(), 21.37);
        chamber.set_nominal_temperature(-20.0, false).await.unwrap();
        assert_eq!(chamber.nominal_temperature().await.unwrap(), -20.0);

        let sent = chamber.transport().sent();
        assert_eq!(sent[0], ["11004", "1", "1"]);
        assert_eq!(sent.last().unwrap(), &["11002", "1", "1"]);
        assert!(sent.contains(&vec!["11001".to_string(), "1".into(), "1".into(), "-20".into()]));
    }

    #[tokio::test]
    async fn test_set_temperature_busy_not_forced_is_skipped() {
        let chamber = chamber(ScriptedTransport::busy());
        let outcome = chamber.set_nominal_temperature(40.0, false).await.unwrap();

        assert!(outcome.is_skipped());
        assert_eq!(outcome.fields(), ["0"]);
        assert_eq!(chamber.transport().count(CommandCode::SetNominalTemperature), 0);
        assert_eq!(chamber.transport().stops(), 0);
    }

    #[tokio::test]
    async fn test_set_temperature_busy_forced_stops_first() {
        let chamber = chamber(ScriptedTransport::busy());
        let outcome = chamber.set_nominal_temperature(40.0, true).await.unwrap();
        assert!(!outcome.is_skipped());

        let sent = chamber.transport().sent();
        let stop = sent.iter().position(|f| is_power_write(f, "0")).unwrap();
        let set = sent.iter().position(|f| f[0] == "11001").unwrap();
        assert!(stop < set);
    }

    #[tokio::test]
    async fn test_set_channel_forced_does_not_stop() {
        let chamber = chamber(ScriptedTransport::busy());
        let outcome = chamber.set_channel(3, 1, true).await.unwrap();
        assert_eq!(outcome.fields(), ["1"]);
        assert_eq!(chamber.transport().stops(), 0);
        assert!(chamber.channel(3).await.unwrap());
        assert!(!chamber.channel(4).await.unwrap());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let chamber = chamber(ScriptedTransport::new());
        chamber.start(false).await.unwrap();
        assert_eq!(chamber.status().await.unwrap(), ChamberStatus::Running);

        // Busy now, so a second unforced start is skipped
        assert!(chamber.start(false).await.unwrap().is_skipped());

        chamber.stop().await.unwrap();
        assert!(chamber.is_available().await.unwrap());
        assert!(chamber
            .transport()
            .sent()
            .contains(&vec!["14001".to_string(), "1".into(), "1".into(), "1".into()]));
    }

    #[tokio::test]
    async fn test_protocol_error_is_surfaced() {
        let chamber = chamber(ScriptedTransport::new().failing(CommandCode::GetActualTemperature, "-4"));
        let err = chamber.actual_temperature().await.unwrap_err();

        assert_eq!(err.protocol_status(), Some(&ProtocolStatus::ChamberNotPresent));
        assert_eq!(
            err.to_string(),
            "get actual temperature (11004): chamber not present (-4)"
        );
    }

    #[tokio::test]
    async fn test_undefined_error_is_surfaced() {
        let chamber = chamber(ScriptedTransport::new().failing(CommandCode::SetDigitalChannel, "-99"));
        let err = chamber.stop().await.unwrap_err();
        assert_eq!(err.protocol_status(), Some(&ProtocolStatus::Undefined("-99".into())));
        assert!(err.to_string().contains("undefined error"));
    }

    #[tokio::test]
    async fn test_send_raw() {
        let chamber = chamber(ScriptedTransport::new());
        let reply = chamber.send_raw(&["10012", "1"]).await.unwrap();
        assert_eq!(reply.fields(), ["1", "1"]);

        let err = chamber.send_raw(&["10012"]).await.unwrap_err();
        assert!(matches!(err, ChamberError::InvalidArguments(_)));
        assert_eq!(chamber.transport().sent().len(), 1);

        let err = chamber.send_raw(&["12345", "1"]).await.unwrap_err();
        assert_eq!(err.protocol_status(), Some(&ProtocolStatus::UnknownCommand));
    }

    #[tokio::test]
    async fn test_exact_frames_with_mock() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();

        transport
            .expect_exchange()
            .withf(|f| f.fields() == ["10012", "7"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(reply(&["1", "2"])));
        transport
            .expect_exchange()
            .withf(|f| f.fields() == ["14001", "7", "1", "0"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(reply(&["1"])));
        transport
            .expect_exchange()
            .withf(|f| f.fields() == ["11001", "1", "7", "85.5"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(reply(&["1"])));

        let chamber = Chamber::new(ChamberSession::new("chamber.lab", 2049, 7), transport);
        let outcome = chamber.set_nominal_temperature(85.5, true).await.unwrap();
        assert_eq!(outcome.fields(), ["1"]);
    }

    #[tokio::test]
    async fn test_missing_payload_field() {
        let mut transport = MockTransport::new();
        transport
            .expect_exchange()
            .returning(|_| Ok(reply(&["1"])));

        let chamber = Chamber::new(ChamberSession::new("chamber.lab", 2049, 1), transport);
        let err = chamber.status().await.unwrap_err();
        assert!(matches!(err, ChamberError::MissingField { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_non_numeric_temperature() {
        let mut transport = MockTransport::new();
        transport
            .expect_exchange()
            .returning(|_| Ok(reply(&["1", "n/a"])));

        let chamber = Chamber::new(ChamberSession::new("chamber.lab", 2049, 1), transport);
        let err = chamber.actual_temperature().await.unwrap_err();
        assert!(matches!(err, ChamberError::InvalidValue { ref value, .. } if value == "n/a"));
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let mut transport = MockTransport::new();
        transport
            .expect_exchange()
            .returning(|_| Err(TransportError::ConnectionFailed("refused".into())));

        let chamber = Chamber::new(ChamberSession::new("chamber.lab", 2049, 1), transport);
        let err = chamber.start(false).await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
