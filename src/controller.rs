//! Process orchestration.
//!
//! This module wires the subsystems together and owns the shutdown signal.
//!
//! Components:
//! - `controller_handler`: builds the shared state from a [`Config`](crate::configuration::Config),
//!   runs the listener, the statistics reporter and the operator console, and
//!   drives shutdown.
//! - `console`: the operator command loop (`STATS`, `EXIT`).

pub mod console;
pub mod controller_handler;


pub use console::OperatorConsole;
pub use controller_handler::Controller;
