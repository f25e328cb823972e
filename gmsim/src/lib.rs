//! GM Mount Simulator (gmsim)
//!
//! A stand-in for a 10micron GM-series mount: it answers the text protocol
//! over TCP from an in-memory mount state, records every batch it receives
//! and can be taken offline to exercise reconnection.

pub mod mount;
pub mod server;

pub use mount::*;
pub use server::*;
