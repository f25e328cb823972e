//! GM Wire Library (gmwire)
//!
//! This library contains definitions shared between the link layer (gmlink),
//! the telemetry core (gmcore) and the simulator (gmsim): the error taxonomy,
//! the data model, the command tables and the reply codecs for the 10micron
//! text protocol.

pub mod types;
pub mod commands;
pub mod coords;
pub mod telemetry;
pub mod protocol;
pub mod error;

pub use types::*;
pub use commands::*;
pub use coords::*;
pub use telemetry::*;
pub use protocol::*;
pub use error::*;
