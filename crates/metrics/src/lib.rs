//! Metric names for tessera.
//!
//! Crates record through the `metrics` facade behind their own `metrics`
//! feature. Nothing is exported until the host installs a recorder.
//!
//! ```rust,ignore
//! use tessera_metrics::{counter, events};
//!
//! counter!(events::PUBLISHED_TOTAL, "type" => "git-operation").increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
