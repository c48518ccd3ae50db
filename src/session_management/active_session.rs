use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::inactivity::InactivityMonitor;
use super::session::SessionId;
use super::session_manager::SessionManager;
use super::CloseReason;
use crate::command::{Dispatcher, Reply};
use crate::error_handling::types::CommandError;

/// Everything a running session needs besides its own stream.
#[derive(Clone)]
pub struct SessionContext {
    pub manager: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
    /// `None` disables the inactivity monitor
    pub inactivity_timeout: Option<Duration>,
    /// Longest accepted line, newline included
    pub max_line_bytes: usize,
}

/// Inbound bytes not yet split into lines.
///
/// A line that outgrows `limit` is reported once and then dropped through its
/// terminating newline, so the buffer never holds more than one limit's worth
/// of an unfinished line plus the last chunk.
struct LineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline
    scanned: usize,
    limit: usize,
    discarding: bool,
}

enum Framed {
    Line(Vec<u8>),
    TooLong,
}

impl LineBuffer {
    fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            limit,
            discarding: false,
        }
    }

    fn next_line(&mut self) -> Option<Framed> {
        loop {
            let newline = self.pending[self.scanned..]
                .iter()
                .position(|b| *b == b'\n');
            let Some(offset) = newline else {
                if self.discarding {
                    self.pending.clear();
                } else if self.pending.len() >= self.limit {
                    self.pending.clear();
                    self.discarding = true;
                    self.scanned = 0;
                    return Some(Framed::TooLong);
                }
                self.scanned = self.pending.len();
                return None;
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.limit {
                return Some(Framed::TooLong);
            }
            return Some(Framed::Line(line));
        }
    }

    /// An unterminated last line, once the client has closed.
    fn take_rest(&mut self) -> Option<Vec<u8>> {
        if self.discarding || self.pending.is_empty() {
            return None;
        }
        self.scanned = 0;
        Some(std::mem::take(&mut self.pending))
    }
}

/// Drives one admitted connection until it closes.
///
/// A single task owns the read half, the write half, the inactivity timer
/// and the pending deferred replies. Replies are therefore written in order
/// by one writer, and dropping the session cancels the timer and every
/// pending reply.
pub struct ActiveSession<R, W> {
    id: SessionId,
    reader: R,
    writer: W,
    ctx: SessionContext,
    shutdown: watch::Receiver<bool>,
    monitor: InactivityMonitor,
    deferred: JoinSet<Reply>,
}

impl<R, W> ActiveSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        id: SessionId,
        reader: R,
        writer: W,
        ctx: SessionContext,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let monitor = InactivityMonitor::new(ctx.inactivity_timeout);
        Self {
            id,
            reader,
            writer,
            ctx,
            shutdown,
            monitor,
            deferred: JoinSet::new(),
        }
    }

    /// Greets the client, serves it and finally releases its slot in the
    /// [`SessionManager`], which promotes the next queued connection.
    pub async fn run(mut self) -> CloseReason {
        let welcome = format!(
            "WELCOME {}. You are connected as READ. Identify with HELLO <name> <role>.",
            self.id
        );
        let reason = match self.send(&welcome).await {
            Ok(()) => {
                self.ctx.dispatcher.record_activity(&self.id, "connected");
                self.serve().await
            }
            Err(e) => CloseReason::Failed(e.to_string()),
        };

        self.deferred.abort_all();
        match self.ctx.manager.on_session_closed(&self.id) {
            Some(last) => info!(
                "[{}] closed ({}): {} message(s), {} byte(s) in, {} byte(s) out",
                self.id, reason, last.messages, last.bytes_in, last.bytes_out
            ),
            None => info!("[{}] closed ({})", self.id, reason),
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!("[{}] shutdown of write half failed: {}", self.id, e);
        }
        self.ctx
            .dispatcher
            .record_activity(&self.id, &format!("closed: {}", reason));
        reason
    }

    async fn serve(&mut self) -> CloseReason {
        let mut input = LineBuffer::new(self.ctx.max_line_bytes);

        loop {
            if *self.shutdown.borrow() {
                return self.close_for_shutdown().await;
            }
            let nothing_pending = self.deferred.is_empty();

            tokio::select! {
                read = self.reader.read_buf(&mut input.pending) => {
                    match read {
                        Ok(0) => {
                            if let Some(rest) = input.take_rest() {
                                if let Some(reason) = self.handle_line(&rest).await {
                                    return reason;
                                }
                            }
                            return CloseReason::ClientClosed;
                        }
                        Ok(n) => {
                            self.on_inbound(n);
                            if let Some(reason) = self.drain_lines(&mut input).await {
                                return reason;
                            }
                        }
                        Err(e) => return CloseReason::Failed(e.to_string()),
                    }
                }
                Some(joined) = self.deferred.join_next(), if !nothing_pending => {
                    match joined {
                        Ok(reply) => {
                            if let Err(e) = self.send(&reply.text).await {
                                return CloseReason::Failed(e.to_string());
                            }
                            self.monitor.touch();
                            if let Some(reason) = reply.close {
                                return reason;
                            }
                        }
                        Err(e) => warn!("[{}] deferred reply lost: {}", self.id, e),
                    }
                }
                _ = self.monitor.expired(), if nothing_pending => {
                    return self.close_for_inactivity().await;
                }
                _ = self.shutdown.changed() => {
                    return self.close_for_shutdown().await;
                }
            }
        }
    }

    /// Every inbound chunk counts as activity, complete line or not.
    fn on_inbound(&mut self, bytes: usize) {
        self.ctx
            .manager
            .stats()
            .record_traffic(&self.id, bytes as u64, 0);
        self.monitor.touch();
        self.ctx.manager.touch(&self.id);
    }

    async fn drain_lines(&mut self, input: &mut LineBuffer) -> Option<CloseReason> {
        while let Some(framed) = input.next_line() {
            let reason = match framed {
                Framed::Line(line) => self.handle_line(&line).await,
                Framed::TooLong => {
                    warn!(
                        "[{}] line longer than {} bytes dropped",
                        self.id, input.limit
                    );
                    let err = CommandError::LineTooLong(input.limit);
                    self.send(&err.to_wire())
                        .await
                        .err()
                        .map(|e| CloseReason::Failed(e.to_string()))
                }
            };
            if reason.is_some() {
                return reason;
            }
        }
        None
    }

    /// Returns the close reason if the line ends the session.
    async fn handle_line(&mut self, raw: &[u8]) -> Option<CloseReason> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return None;
        }
        self.ctx.manager.stats().record_message(&self.id);

        let reply = self.ctx.dispatcher.dispatch(&self.id, line).await;
        if let Some(delay) = reply.delay {
            debug!("[{}] reply deferred by {:?}", self.id, delay);
            self.deferred.spawn(async move {
                tokio::time::sleep(delay).await;
                reply
            });
            return None;
        }

        if let Err(e) = self.send(&reply.text).await {
            return Some(CloseReason::Failed(e.to_string()));
        }
        reply.close
    }

    async fn close_for_inactivity(&mut self) -> CloseReason {
        let secs = self.monitor.window().map(|w| w.as_secs()).unwrap_or_default();
        warn!("[{}] no activity for {} seconds, closing", self.id, secs);
        let notice = format!(
            "TIMEOUT No activity for {} seconds. Closing connection.",
            secs
        );
        if let Err(e) = self.send(&notice).await {
            debug!("[{}] timeout notice not delivered: {}", self.id, e);
        }
        CloseReason::InactivityTimeout
    }

    async fn close_for_shutdown(&mut self) -> CloseReason {
        info!("[{}] closing for server shutdown", self.id);
        if let Err(e) = self.send("SERVER shutting down").await {
            debug!("[{}] shutdown notice not delivered: {}", self.id, e);
        }
        CloseReason::Shutdown
    }

    async fn send(&mut self, text: &str) -> io::Result<()> {
        let mut payload = String::with_capacity(text.len() + 1);
        payload.push_str(text);
        payload.push('\n');

        self.writer.write_all(payload.as_bytes()).await?;
        self.writer.flush().await?;
        self.ctx
            .manager
            .stats()
            .record_traffic(&self.id, 0, payload.len() as u64);
        Ok(())
    }
}
