//! # climatectl Core Library
//!
//! Remote control of climate chambers speaking the SIMSERV protocol over TCP:
//! - Frame codec for the 0xB6-delimited wire format
//! - Status, temperature and digital channel commands
//! - Availability gate shared by every state-changing command
//! - Thermal cycling programs with cancellation and a guaranteed trailing stop
//! - TOML configuration of chambers and program presets
//! - CLI exit codes for automation
//!
//! ## Example
//!
//! ```rust,no_run
//! use climatectl_core::{Chamber, CycleProgram, Step, ThermalCycleController};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let chamber = Chamber::connect("192.168.1.20", 2049, 1);
//!     println!("actual: {} C", chamber.actual_temperature().await?);
//!
//!     let program = CycleProgram::new(
//!         3,
//!         [Step::new(-20.0, 15), Step::new(60.0, 15), Step::new(25.0, 5)],
//!         0.5,
//!         2.0,
//!     )?;
//!
//!     let mut controller = ThermalCycleController::new(chamber);
//!     let report = controller.cycle(&program, false, &CancellationToken::new()).await?;
//!     println!("{} cycles completed", report.cycles_completed);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ChamberConfig, ConfigError, ProgramConfig};
pub use crate::core::chamber::{Chamber, ChamberError, ChamberSession, Gate, Outcome};
pub use crate::core::cycle::{
    CycleError, CycleProgram, CycleReport, CycleState, Step, StepKind, ThermalCycleController,
};
pub use crate::core::lock::{LockError, LockHolder, ProgramLock};
pub use crate::core::protocol::{ChamberStatus, CommandCode, CommandFrame, ProtocolStatus, ResponseFrame};
pub use crate::core::transport::{TcpConfig, TcpTransport, Transport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
