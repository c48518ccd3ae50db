//! Session management core module.
//!
//! This module provides the core types for per-connection state: the role a
//! session holds, where it is in its lifecycle and why it ended. The
//! submodules hold the session value itself, the admission controller that
//! owns every session, the inactivity monitor and the per-connection task.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Submodule running one admitted connection.
pub mod active_session;
/// Submodule for the idle-connection timer.
pub mod inactivity;
/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for the admission controller.
pub mod session_manager;

pub use active_session::{ActiveSession, SessionContext};
pub use session::{Session, SessionId};
pub use session_manager::{Admission, QueueTicket, SessionManager};

/// Authorization level of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    Read,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Read => write!(f, "READ"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("read") {
            Ok(Role::Read)
        } else if s.eq_ignore_ascii_case("admin") {
            Ok(Role::Admin)
        } else {
            Err(())
        }
    }
}

/// Lifecycle of a live session. A closed session is removed from the
/// [`SessionManager`], so it has no phase of its own.
///
/// Variants:
/// - `Connected`: admitted, no identity declared yet.
/// - `Identified`: `HELLO` accepted, the name is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Connected,
    Identified,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    ClientQuit,
    InactivityTimeout,
    AttemptsExhausted,
    Shutdown,
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed the connection"),
            CloseReason::ClientQuit => write!(f, "client quit"),
            CloseReason::InactivityTimeout => write!(f, "inactivity timeout"),
            CloseReason::AttemptsExhausted => write!(f, "too many failed ADMIN attempts"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
            CloseReason::Failed(e) => write!(f, "connection error: {}", e),
        }
    }
}
