//! Error plumbing shared by every tessera crate.

pub mod error;
pub mod panic;

pub use {
    error::{Error, FromMessage, Result},
    panic::panic_message,
};
