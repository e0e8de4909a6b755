//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod catalog;
pub(crate) mod plan;
pub(crate) mod ports;
pub(crate) mod reclaim;
