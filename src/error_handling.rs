//! Error types shared across the server.
//!
//! Every subsystem reports failures through one of the enums in [`types`].
//! Per-command failures are [`types::CommandError`] and are always answered on
//! the wire; everything else is logged for the operator.

pub mod types;
