use super::session::{Session, SessionId};
use super::Role;
use crate::error_handling::types::SessionError;
use crate::statistics::{ClientStats, StatsAggregator, StatsSnapshot};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Outcome of [`SessionManager::on_connect`].
#[derive(Debug)]
pub enum Admission {
    /// A session now exists for the connection.
    Admitted,
    /// The connection waits in line; `position` is 1-based.
    Queued { position: usize, ticket: QueueTicket },
}

/// Held by a queued connection. Resolves once the connection has been
/// promoted to a session.
#[derive(Debug)]
pub struct QueueTicket {
    pub id: SessionId,
    pub promoted: oneshot::Receiver<()>,
}

#[derive(Debug)]
struct PendingConnection {
    id: SessionId,
    enqueued_at: DateTime<Utc>,
    promote: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct AdmissionState {
    sessions: HashMap<SessionId, Session>,
    queue: VecDeque<PendingConnection>,
}

/// The admission controller and sole owner of every [`Session`].
///
/// At most `max_sessions` sessions exist at any time. Further connections are
/// queued in arrival order and promoted, oldest first, whenever a session
/// closes. The active set and the queue live under a single lock so the
/// check-and-insert on connect and the remove-and-promote on close are atomic
/// with respect to each other.
///
/// # Fields Overview
///
/// - `state`: active sessions keyed by id plus the FIFO of pending connections
/// - `stats`: statistics ledger, opened and closed together with each session
/// - `max_sessions`: the connection limit
pub struct SessionManager {
    state: Mutex<AdmissionState>,
    stats: Arc<StatsAggregator>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize, stats: Arc<StatsAggregator>) -> Self {
        Self {
            state: Mutex::new(AdmissionState::default()),
            stats,
            max_sessions,
        }
    }

    fn state(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Admits the connection if a slot is free and nobody is waiting,
    /// otherwise appends it to the queue.
    pub fn on_connect(&self, id: SessionId) -> Result<Admission, SessionError> {
        let mut state = self.state();

        if state.sessions.contains_key(&id) || state.queue.iter().any(|p| p.id == id) {
            return Err(SessionError::DuplicateId(id.to_string()));
        }

        if state.sessions.len() < self.max_sessions && state.queue.is_empty() {
            self.activate(&mut state, id);
            info!(
                "[{}] admitted ({}/{} active)",
                id,
                state.sessions.len(),
                self.max_sessions
            );
            return Ok(Admission::Admitted);
        }

        let (promote, promoted) = oneshot::channel();
        state.queue.push_back(PendingConnection {
            id,
            enqueued_at: Utc::now(),
            promote,
        });
        let position = state.queue.len();
        info!("[{}] server full, queued at position {}", id, position);

        Ok(Admission::Queued {
            position,
            ticket: QueueTicket { id, promoted },
        })
    }

    /// Removes a closed session and promotes waiting connections into the
    /// freed slots. Returns the session's final counters.
    pub fn on_session_closed(&self, id: &SessionId) -> Option<ClientStats> {
        let mut state = self.state();
        let removed = state.sessions.remove(id);
        let final_stats = match removed {
            Some(_) => self.stats.close_client(id),
            None => None,
        };
        self.promote_waiting(&mut state);
        final_stats
    }

    /// Removes a queued connection that gave up before promotion. Returns
    /// `false` if it was no longer queued, i.e. it has already been promoted.
    pub fn withdraw(&self, id: &SessionId) -> bool {
        let mut state = self.state();
        let before = state.queue.len();
        state.queue.retain(|p| p.id != *id);
        let withdrawn = state.queue.len() != before;
        if withdrawn {
            debug!("[{}] left the queue before promotion", id);
        }
        withdrawn
    }

    fn activate(&self, state: &mut AdmissionState, id: SessionId) {
        state.sessions.insert(id, Session::new(id));
        self.stats.open_client(&id);
    }

    fn promote_waiting(&self, state: &mut AdmissionState) {
        while state.sessions.len() < self.max_sessions {
            let Some(pending) = state.queue.pop_front() else {
                break;
            };
            // The lock is held, so the woken task cannot observe the session
            // before it is inserted below.
            if pending.promote.send(()).is_err() {
                debug!("[{}] dropped while queued", pending.id);
                continue;
            }
            self.activate(state, pending.id);
            let waited = Utc::now() - pending.enqueued_at;
            info!(
                "[{}] promoted from queue after {}ms",
                pending.id,
                waited.num_milliseconds()
            );
        }
    }

    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.state().sessions.get(id).cloned()
    }

    /// Runs `f` on the session under the manager's lock.
    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.state().sessions.get_mut(id).map(f)
    }

    pub fn touch(&self, id: &SessionId) {
        self.with_session(id, Session::touch);
    }

    /// Declares the session's identity and mirrors it into the statistics.
    pub fn identify(&self, id: &SessionId, name: &str, role: Role) -> Result<(), SessionError> {
        self.with_session(id, |session| session.identify(name, role))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.stats.set_identity(id, Some(name), role);
        Ok(())
    }

    pub fn elevate(&self, id: &SessionId) -> Result<(), SessionError> {
        let name = self
            .with_session(id, |session| {
                session.elevate();
                session.name.clone()
            })
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.stats.set_identity(id, name.as_deref(), Role::Admin);
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn queued_count(&self) -> usize {
        self.state().queue.len()
    }

    /// Current statistics including the queue length and, per client, when
    /// the session was admitted and when it last sent anything.
    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.state();
        let mut snapshot = self.stats.snapshot_with(|id, client| {
            if let Some(session) = state.sessions.get(id) {
                client.connected_at = Some(session.connected_at);
                client.last_active_at = Some(session.last_active_at);
            }
        });
        snapshot.queued_count = state.queue.len();
        snapshot
    }
}
