use super::types::{ClientStats, StatsSnapshot};
use crate::session_management::{Role, SessionId};
use chrono::Utc;
use log::trace;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Ledger {
    clients: BTreeMap<SessionId, ClientStats>,
    total_bytes_in: u64,
    total_bytes_out: u64,
    total_messages: u64,
    total_sessions: u64,
}

/// Per-client and cumulative traffic counters.
///
/// Per-client entries exist only while their session is active. Totals are
/// cumulative for the process lifetime and are never decremented, so they
/// always equal the sum of every current and past session's counters.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    ledger: Mutex<Ledger>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_client(&self, id: &SessionId) {
        let mut ledger = self.ledger();
        ledger.total_sessions += 1;
        ledger.clients.insert(
            *id,
            ClientStats {
                id: id.to_string(),
                ..ClientStats::default()
            },
        );
    }

    /// Drops the per-client entry and returns its final counters.
    pub fn close_client(&self, id: &SessionId) -> Option<ClientStats> {
        self.ledger().clients.remove(id)
    }

    pub fn set_identity(&self, id: &SessionId, name: Option<&str>, role: Role) {
        if let Some(client) = self.ledger().clients.get_mut(id) {
            client.name = name.map(str::to_string);
            client.role = role;
        }
    }

    /// Adds traffic to a session and to the totals. Traffic of unknown
    /// sessions is ignored so the totals stay a sum of session counters.
    pub fn record_traffic(&self, id: &SessionId, bytes_in: u64, bytes_out: u64) {
        let mut ledger = self.ledger();
        let Some(client) = ledger.clients.get_mut(id) else {
            trace!("[{}] traffic after close ignored", id);
            return;
        };
        client.bytes_in += bytes_in;
        client.bytes_out += bytes_out;
        ledger.total_bytes_in += bytes_in;
        ledger.total_bytes_out += bytes_out;
    }

    pub fn record_message(&self, id: &SessionId) {
        let mut ledger = self.ledger();
        let Some(client) = ledger.clients.get_mut(id) else {
            return;
        };
        client.messages += 1;
        ledger.total_messages += 1;
    }

    pub fn client(&self, id: &SessionId) -> Option<ClientStats> {
        self.ledger().clients.get(id).cloned()
    }

    /// Snapshot without queue information, see
    /// [`SessionManager::snapshot`](crate::session_management::SessionManager::snapshot).
    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_with(|_, _| {})
    }

    /// Snapshot whose per-client entries are passed through `annotate`
    /// before they are collected.
    pub fn snapshot_with(
        &self,
        mut annotate: impl FnMut(&SessionId, &mut ClientStats),
    ) -> StatsSnapshot {
        let ledger = self.ledger();
        let per_client = ledger
            .clients
            .iter()
            .map(|(id, client)| {
                let mut client = client.clone();
                annotate(id, &mut client);
                client
            })
            .collect();
        StatsSnapshot {
            taken_at: Utc::now(),
            active_count: ledger.clients.len(),
            queued_count: 0,
            per_client,
            total_bytes_in: ledger.total_bytes_in,
            total_bytes_out: ledger.total_bytes_out,
            total_messages: ledger.total_messages,
            total_sessions: ledger.total_sessions,
        }
    }
}
