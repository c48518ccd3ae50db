use super::{Role, SessionPhase};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;

/// Identifies a connection by its remote address. Unique while the
/// connection is open, may be reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(SocketAddr);

impl From<SocketAddr> for SessionId {
    fn from(addr: SocketAddr) -> Self {
        SessionId(addr)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity, role and liveness of one admitted connection. Traffic counters
/// are kept by the statistics ledger under the same id.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub name: Option<String>,
    pub role: Role,
    pub phase: SessionPhase,
    pub connected_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub admin_attempts: u32,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: None,
            role: Role::Read,
            phase: SessionPhase::Connected,
            connected_at: now,
            last_active_at: now,
            admin_attempts: 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_identified(&self) -> bool {
        self.phase == SessionPhase::Identified
    }

    pub fn identify(&mut self, name: &str, role: Role) {
        self.name = Some(name.to_string());
        self.role = role;
        self.phase = SessionPhase::Identified;
    }

    /// Grants ADMIN. The role never goes back to READ.
    pub fn elevate(&mut self) {
        self.role = Role::Admin;
        self.admin_attempts = 0;
    }

    /// Counts a failed elevation and returns the running total.
    pub fn fail_elevation(&mut self) -> u32 {
        self.admin_attempts += 1;
        self.admin_attempts
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}
