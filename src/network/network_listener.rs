//! # Network Listener Module
//!
//! This module accepts incoming TCP connections and walks each one through
//! admission, the wait queue and its session.
//!
//! The main component is [`NetworkListener`] which owns the listening socket
//! and spawns one task per accepted connection. Each task asks the
//! [`SessionManager`] for admission; a connection that has to wait is told its
//! place in line and parked until a slot frees up.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ SessionManager  │
//! │ Connections     │    │                  │    │ (admit / queue) │
//! └─────────────────┘    │ - accept loop    │    └────────┬────────┘
//!                        │ - task per conn  │             │ promotion
//!                        └──────────────────┘    ┌────────▼────────┐
//!                                                │ ActiveSession   │
//!                                                └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gatehouse::network::NetworkListener;
//! use gatehouse::session_management::SessionContext;
//! use gatehouse::error_handling::types::NetworkError;
//! use tokio::sync::watch;
//!
//! async fn serve(ctx: SessionContext) -> Result<(), NetworkError> {
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let listener = NetworkListener::bind("127.0.0.1:4000".parse().unwrap(), ctx, shutdown_rx).await?;
//!     listener.start_listening().await
//! }
//! ```

use super::types::ConnectionRequest;
use crate::error_handling::types::NetworkError;
use crate::session_management::{
    ActiveSession, Admission, CloseReason, SessionContext, SessionId, SessionManager,
};
use log::{debug, error, info, warn};
use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

/// Input a queued client may send before promotion; it is replayed once the
/// session starts.
const MAX_QUEUED_INPUT: usize = 64 * 1024;

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A TCP listener that hands every accepted connection to its own task.
///
/// The listener stops accepting once the shutdown channel flips to `true`,
/// then waits for its connection tasks. Dropping the future returned by
/// [`start_listening`](Self::start_listening) aborts every connection task.
pub struct NetworkListener {
    /// Bound listening socket
    listener: TcpListener,

    /// Shared state every session task needs
    ctx: SessionContext,

    /// Flips to `true` when the server shuts down
    shutdown: watch::Receiver<bool>,
}

impl NetworkListener {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// `NetworkError::BindError` if the address is in use, not local, or a
    /// privileged port without the permission to bind it.
    pub async fn bind(
        addr: SocketAddr,
        ctx: SessionContext,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("[!] Unable to bind {}: {}", addr, e);
            NetworkError::BindError(e)
        })?;
        info!("Listening on {}", addr);
        Ok(Self {
            listener,
            ctx,
            shutdown,
        })
    }

    /// The bound address, with the real port when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener
            .local_addr()
            .map_err(NetworkError::LocalAddrError)
    }

    /// Accepts connections until shutdown, then waits for the connection
    /// tasks to finish.
    pub async fn start_listening(mut self) -> Result<(), NetworkError> {
        let mut connections = JoinSet::new();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, client_addr)) => {
                        let request = ConnectionRequest::new(stream, client_addr);
                        connections.spawn(handle_connection(
                            request,
                            self.ctx.clone(),
                            self.shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("[!] {}", NetworkError::AcceptError(e));
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("[!] Connection task failed: {}", e);
                    }
                }
                _ = self.shutdown.changed() => break,
            }
        }

        info!(
            "Listener stopped, waiting for {} connection task(s)",
            connections.len()
        );
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!("[!] Connection task failed: {}", e);
            }
        }
        Ok(())
    }
}

/// Runs one connection from admission to close and returns why it ended.
///
/// A connection that finds the server full is told its position and waits.
/// Bytes it sends meanwhile are kept and processed after promotion. If it
/// disconnects or the server shuts down first, it leaves the queue; a slot
/// that was granted in the same instant is handed on to the next in line.
pub async fn handle_connection<S>(
    request: ConnectionRequest<S>,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = SessionId::from(request.client_addr);
    debug!("[{}] accepted at {}", id, request.timestamp.to_rfc3339());

    let admission = match ctx.manager.on_connect(id) {
        Ok(admission) => admission,
        Err(e) => {
            warn!("[{}] refused: {}", id, e);
            return CloseReason::Failed(e.to_string());
        }
    };

    let (read_half, mut write_half) = tokio::io::split(request.stream);
    let mut reader = BufReader::new(read_half);
    let mut early_input = Vec::new();

    if let Admission::Queued {
        position,
        mut ticket,
    } = admission
    {
        let notice = format!(
            "QUEUED Server is full. You are number {} in line.\n",
            position
        );
        let waited = match write_half.write_all(notice.as_bytes()).await {
            Ok(()) => {
                wait_in_queue(
                    &mut reader,
                    &mut early_input,
                    &mut ticket.promoted,
                    &mut shutdown,
                )
                .await
            }
            Err(e) => Err(CloseReason::Failed(e.to_string())),
        };

        if let Err(reason) = waited {
            leave_queue(&ctx.manager, &id, &mut ticket.promoted);
            if reason == CloseReason::Shutdown {
                if let Err(e) = write_half.write_all(b"SERVER shutting down\n").await {
                    debug!("[{}] shutdown notice not delivered: {}", id, e);
                }
            }
            if let Err(e) = write_half.shutdown().await {
                debug!("[{}] shutdown of write half failed: {}", id, e);
            }
            info!("[{}] left the queue: {}", id, reason);
            return reason;
        }
    }

    let reader = Cursor::new(early_input).chain(reader);
    ActiveSession::new(id, reader, write_half, ctx, shutdown)
        .run()
        .await
}

/// Parks a queued connection until promotion. Returns the reason if it has
/// to give up instead.
async fn wait_in_queue<R>(
    reader: &mut R,
    early_input: &mut Vec<u8>,
    promoted: &mut oneshot::Receiver<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), CloseReason>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 1024];
    loop {
        if *shutdown.borrow() {
            return Err(CloseReason::Shutdown);
        }

        tokio::select! {
            biased;

            _ = shutdown.changed() => return Err(CloseReason::Shutdown),
            granted = &mut *promoted => {
                return granted.map_err(|_| {
                    CloseReason::Failed(String::from("admission controller went away"))
                });
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => return Err(CloseReason::ClientClosed),
                Ok(n) => {
                    early_input.extend_from_slice(&chunk[..n]);
                    if early_input.len() > MAX_QUEUED_INPUT {
                        return Err(CloseReason::Failed(String::from(
                            "too much input while queued",
                        )));
                    }
                }
                Err(e) => return Err(CloseReason::Failed(e.to_string())),
            },
        }
    }
}

fn leave_queue(manager: &SessionManager, id: &SessionId, promoted: &mut oneshot::Receiver<()>) {
    if manager.withdraw(id) {
        return;
    }
    // Promoted while giving up: release the slot to the next in line
    if promoted.try_recv().is_ok() {
        manager.on_session_closed(id);
    }
}
