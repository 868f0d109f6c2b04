//! Command dispatch and host wiring.
//!
//! - Routing a command to a plugin handler or a gateway tool (`dispatcher`)
//! - `key=value` argument parsing (`args`)
//! - The [`Tessera`] host assembling bus, plugin runtime and gateway from
//!   configuration (`host`)

pub mod args;
pub mod dispatcher;
pub mod error;
pub mod host;

pub use {
    args::{build_arguments, parse_key_values},
    dispatcher::{CommandDispatcher, CommandResult, CommandRoute},
    error::{Error, Result},
    host::{HostStatus, StartReport, Tessera},
};
