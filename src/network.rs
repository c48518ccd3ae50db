//! TCP front door of the server.
//!
//! Components:
//! - `network_listener`: accept loop and the per-connection path through
//!   admission, the wait queue and the session.
//! - `types`: the accepted-connection request handed along that path.

pub mod network_listener;
pub mod types;

pub use network_listener::{handle_connection, NetworkListener};
pub use types::ConnectionRequest;
