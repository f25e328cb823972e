//! GM Link Library (gmlink)
//!
//! This library holds one TCP conversation with a 10micron mount per
//! `Connection`, and a typed client for the poll batches on top of it.

pub mod client;
pub mod connection;

pub use client::*;
pub use connection::*;
pub use gmwire::*;
