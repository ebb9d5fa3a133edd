//! SIMSERV protocol implementation
//!
//! Provides:
//! - The delimiter-framed line codec
//! - Typed command and reply codes
//! - Command and response frames

pub mod codes;
pub mod frame;
pub mod simserv;

pub use codes::{ChamberStatus, CommandCode, ProtocolStatus};
pub use frame::{CommandFrame, ResponseFrame};
pub use simserv::{decode as frame_decode, encode as frame_encode, ProtocolError, CR, DELIM};
