use crate::session_management::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters of one active session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub id: String,
    pub name: Option<String>,
    pub role: Role,
    pub messages: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Filled in from the live session when the snapshot is taken
    pub connected_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl ClientStats {
    fn render_line(&self, now: DateTime<Utc>) -> String {
        let mut line = format!(
            "client {} name={} role={} messages={} bytes_in={} bytes_out={}",
            self.id,
            self.name.as_deref().unwrap_or("-"),
            self.role,
            self.messages,
            self.bytes_in,
            self.bytes_out
        );
        if let Some(connected_at) = self.connected_at {
            line.push_str(&format!(" connected={}s", seconds_since(connected_at, now)));
        }
        if let Some(last_active_at) = self.last_active_at {
            line.push_str(&format!(" idle={}s", seconds_since(last_active_at, now)));
        }
        line
    }
}

fn seconds_since(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - then).num_seconds().max(0)
}

/// Point-in-time projection of the statistics ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub active_count: usize,
    pub queued_count: usize,
    pub per_client: Vec<ClientStats>,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
    pub total_messages: u64,
    /// Sessions ever admitted, including closed ones
    pub total_sessions: u64,
}

impl StatsSnapshot {
    /// Multi-line text form, terminated by an `END` line.
    pub fn render(&self) -> String {
        let mut lines = vec![
            String::from("STATS"),
            format!("taken_at: {}", self.taken_at.to_rfc3339()),
            format!("active_connections: {}", self.active_count),
            format!("queued_connections: {}", self.queued_count),
        ];
        lines.extend(
            self.per_client
                .iter()
                .map(|client| client.render_line(self.taken_at)),
        );
        lines.push(format!("total_messages: {}", self.total_messages));
        lines.push(format!("total_bytes_in: {}", self.total_bytes_in));
        lines.push(format!("total_bytes_out: {}", self.total_bytes_out));
        lines.push(format!("total_sessions: {}", self.total_sessions));
        lines.push(String::from("END"));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_clients_between_header_and_end() {
        let snapshot = StatsSnapshot {
            taken_at: Utc::now(),
            active_count: 1,
            queued_count: 2,
            per_client: vec![ClientStats {
                id: "127.0.0.1:5000".into(),
                name: Some("ana".into()),
                role: Role::Admin,
                messages: 3,
                bytes_in: 40,
                bytes_out: 120,
                ..ClientStats::default()
            }],
            total_bytes_in: 90,
            total_bytes_out: 300,
            total_messages: 7,
            total_sessions: 2,
        };

        let text = snapshot.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.first(), Some(&"STATS"));
        assert_eq!(lines.last(), Some(&"END"));
        assert!(text.contains("active_connections: 1"));
        assert!(text.contains("queued_connections: 2"));
        assert!(text.contains(
            "client 127.0.0.1:5000 name=ana role=ADMIN messages=3 bytes_in=40 bytes_out=120"
        ));
        assert!(text.contains("total_bytes_out: 300"));
    }

    #[test]
    fn render_shows_session_age_and_idle_time() {
        let now = Utc::now();
        let snapshot = StatsSnapshot {
            taken_at: now,
            active_count: 1,
            queued_count: 0,
            per_client: vec![ClientStats {
                id: "127.0.0.1:5001".into(),
                connected_at: Some(now - chrono::Duration::seconds(90)),
                last_active_at: Some(now - chrono::Duration::seconds(7)),
                ..ClientStats::default()
            }],
            total_bytes_in: 0,
            total_bytes_out: 0,
            total_messages: 0,
            total_sessions: 1,
        };

        let text = snapshot.render();
        assert!(text.contains(
            "client 127.0.0.1:5001 name=- role=READ messages=0 bytes_in=0 bytes_out=0 connected=90s idle=7s"
        ));
    }
}
