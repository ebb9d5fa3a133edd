//! Core module containing the chamber control functionality
//!
//! This module provides:
//! - SIMSERV frame codec, command codes and status tables
//! - Per-exchange TCP transport
//! - Typed chamber facade with the availability gate
//! - Thermal cycle controller with cooperative cancellation
//! - Single-instance program lock

pub mod chamber;
pub mod cycle;
pub mod lock;
pub mod protocol;
pub mod transport;

pub use chamber::{Chamber, ChamberError, ChamberSession, Gate, Outcome};
pub use cycle::{CycleError, CycleProgram, CycleReport, CycleState, Step, StepKind, ThermalCycleController};
pub use lock::{LockError, LockHolder, ProgramLock};
