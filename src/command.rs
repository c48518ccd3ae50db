//! Line protocol commands.
//!
//! Every inbound line goes through a single parse step ([`parser`]) into a
//! [`Verb`] and then a [`Command`]; the [`Dispatcher`] authorizes it against
//! the session's role and executes it.

pub mod dispatcher;
pub mod parser;

pub use dispatcher::{Dispatcher, Reply};
pub use parser::{Command, Verb};
