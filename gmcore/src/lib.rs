//! GM Core - 10micron mount telemetry and command core
//!
//! Keeps an in-memory picture of a 10micron GM-series mount current by
//! polling it over four TCP conversations, and serializes user commands over
//! a fifth one.

pub mod command;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod model;
pub mod poll;
pub mod providers;
pub mod refraction;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod scenarios;

pub use command::*;
pub use config::{load_config, MountConfig};
pub use context::*;
pub use dispatcher::*;
pub use events::*;
pub use model::*;
pub use poll::*;
pub use providers::*;
pub use refraction::*;
pub use store::*;
