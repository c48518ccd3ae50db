use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use log::{debug, error, info, warn};

use super::parser::{split_line, Command, Verb};
use crate::configuration::{AuthConfig, AuthMode};
use crate::error_handling::types::{CommandError, FileOp, RepositoryError};
use crate::session_management::{CloseReason, Role, Session, SessionId, SessionManager};
use crate::storage::{validate_name, ActivityLog, Repository};

/// What to send back for one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Response text without the trailing newline
    pub text: String,
    /// Send after this delay instead of immediately
    pub delay: Option<Duration>,
    /// Close the session once the reply is sent
    pub close: Option<CloseReason>,
}

impl Reply {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: None,
            close: None,
        }
    }

    pub fn error(err: CommandError) -> Self {
        Self::now(err.to_wire())
    }

    pub fn closing(text: impl Into<String>, reason: CloseReason) -> Self {
        Self {
            close: Some(reason),
            ..Self::now(text)
        }
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Parses, authorizes and executes commands on behalf of sessions.
///
/// The dispatcher never holds a session itself: it looks the session up in
/// the [`SessionManager`] by id for every line and writes identity changes
/// back through it. File operations run on the blocking pool so a slow disk
/// only stalls the session that asked.
pub struct Dispatcher {
    manager: Arc<SessionManager>,
    repository: Arc<dyn Repository>,
    activity: Arc<dyn ActivityLog>,
    auth: AuthConfig,
    read_ack_delay: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<SessionManager>,
        repository: Arc<dyn Repository>,
        activity: Arc<dyn ActivityLog>,
        auth: AuthConfig,
        read_ack_delay: Option<Duration>,
    ) -> Self {
        Self {
            manager,
            repository,
            activity,
            auth,
            read_ack_delay,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Forwards an event to the activity log; a failing log is reported,
    /// never fatal.
    pub fn record_activity(&self, id: &SessionId, event: &str) {
        if let Err(e) = self.activity.record(Utc::now(), id, event) {
            warn!("[{}] activity log unavailable: {}", id, e);
        }
    }

    /// Handles one non-empty line from session `id`.
    ///
    /// ADMIN-only verbs are refused with `permission denied` before their
    /// arguments are even looked at.
    pub async fn dispatch(&self, id: &SessionId, line: &str) -> Reply {
        let (verb, args) = match split_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("[{}] unparsable line: {}", id, line);
                return Reply::error(e);
            }
        };

        let Some(session) = self.manager.session(id) else {
            warn!("[{}] command for a session that no longer exists", id);
            return session_gone();
        };

        if verb.required_role() == Role::Admin && !session.is_admin() {
            warn!(
                "[{}] permission denied for {:?} (role {})",
                id, verb, session.role
            );
            return Reply::error(CommandError::PermissionDenied);
        }

        let command = match Command::from_args(verb, args) {
            Ok(command) => command,
            Err(e) => return Reply::error(e),
        };

        debug!("[{}] executing {:?}", id, verb);
        self.execute(id, &session, command)
            .await
            .unwrap_or_else(Reply::error)
    }

    async fn execute(
        &self,
        id: &SessionId,
        session: &Session,
        command: Command,
    ) -> Result<Reply, CommandError> {
        match command {
            Command::Hello { name, role } => self.hello(id, session, &name, role),
            Command::Admin { password } => self.elevate(id, session, &password),
            Command::Message { text } => Ok(self.message(id, session, &text)),
            Command::List => {
                let names = self.with_repository(FileOp::List, |r| r.list()).await?;
                Ok(Reply::now(joined("FILES", &names, ", ")))
            }
            Command::Read { name } => {
                let data = self.read_file(FileOp::Read, &name).await?;
                Ok(Reply::now(format!("FILEDATA {} {}", name, STANDARD.encode(data))))
            }
            Command::Download { name } => {
                let data = self.read_file(FileOp::Read, &name).await?;
                Ok(Reply::now(format!("DOWNLOAD {} {}", name, STANDARD.encode(data))))
            }
            Command::Upload { name, payload } => {
                validate_name(&name).map_err(|_| CommandError::InvalidName)?;
                let data = STANDARD
                    .decode(payload.as_bytes())
                    .map_err(|_| CommandError::InvalidPayload)?;
                let size = data.len();
                let target = name.clone();
                self.with_repository(FileOp::Write, move |r| r.write(&target, &data))
                    .await?;
                info!("[{}] uploaded {} ({} bytes)", id, name, size);
                Ok(Reply::now(format!("UPLOAD_OK {}", name)))
            }
            Command::Delete { name } => {
                let target = name.clone();
                self.with_repository(FileOp::Delete, move |r| r.delete(&target))
                    .await?;
                info!("[{}] deleted {}", id, name);
                Ok(Reply::now(format!("DELETE_OK {}", name)))
            }
            Command::Search { needle } => {
                let names = self
                    .with_repository(FileOp::Search, move |r| r.search(&needle))
                    .await?;
                Ok(Reply::now(joined("SEARCH_RESULTS", &names, ",")))
            }
            Command::Info { name } => {
                let target = name.clone();
                let info = self
                    .with_repository(FileOp::Stat, move |r| r.stat(&target))
                    .await?;
                Ok(Reply::now(format!(
                    "INFO {} size={} created={} modified={}",
                    name,
                    info.size,
                    info.created.to_rfc3339(),
                    info.modified.to_rfc3339()
                )))
            }
            Command::Stats => Ok(Reply::now(self.manager.snapshot().render())),
            Command::Help => Ok(Reply::now(help_text(session.role))),
            Command::Quit => Ok(Reply::closing("BYE", CloseReason::ClientQuit)),
        }
    }

    fn hello(
        &self,
        id: &SessionId,
        session: &Session,
        name: &str,
        requested: Role,
    ) -> Result<Reply, CommandError> {
        if session.is_identified() {
            let current = session.name.clone().unwrap_or_default();
            return Err(CommandError::AlreadyIdentified(current));
        }

        let needs_password = requested == Role::Admin
            && self.auth.mode == AuthMode::Password
            && !session.is_admin();
        let granted = if session.is_admin() {
            Role::Admin
        } else if needs_password {
            Role::Read
        } else {
            requested
        };

        if let Err(e) = self.manager.identify(id, name, granted) {
            warn!("[{}] identification failed: {}", id, e);
            return Ok(session_gone());
        }
        info!("[{}] identified as {} ({})", id, name, granted);
        self.record_activity(id, &format!("identified as {} ({})", name, granted));

        if needs_password {
            Ok(Reply::now(format!(
                "OK Hello {}. ADMIN requires a password: send ADMIN <password>.",
                name
            )))
        } else {
            Ok(Reply::now(format!(
                "OK Hello {}. You are set as {}.",
                name, granted
            )))
        }
    }

    fn elevate(
        &self,
        id: &SessionId,
        session: &Session,
        password: &str,
    ) -> Result<Reply, CommandError> {
        if self.auth.mode != AuthMode::Password {
            return Err(CommandError::PasswordAuthDisabled);
        }
        if session.is_admin() {
            return Ok(Reply::now("OK You are already ADMIN."));
        }

        if self.auth.admin_password.as_deref() == Some(password) {
            if let Err(e) = self.manager.elevate(id) {
                warn!("[{}] elevation failed: {}", id, e);
                return Ok(session_gone());
            }
            info!("[{}] elevated to ADMIN", id);
            self.record_activity(id, "elevated to ADMIN");
            return Ok(Reply::now("OK You are now ADMIN."));
        }

        let max = self.auth.max_admin_attempts;
        let attempt = self
            .manager
            .with_session(id, Session::fail_elevation)
            .unwrap_or(max);
        warn!("[{}] wrong ADMIN password ({}/{})", id, attempt, max);

        let err = CommandError::WrongPassword { attempt, max };
        if attempt >= max {
            self.record_activity(id, "too many failed ADMIN attempts");
            return Ok(Reply::closing(
                err.to_wire(),
                CloseReason::AttemptsExhausted,
            ));
        }
        Err(err)
    }

    fn message(&self, id: &SessionId, session: &Session, text: &str) -> Reply {
        self.record_activity(id, &format!("message: {}", text));
        let reply = Reply::now("OK message received");
        match (session.role, self.read_ack_delay) {
            (Role::Read, Some(delay)) => reply.after(delay),
            _ => reply,
        }
    }

    async fn read_file(&self, op: FileOp, name: &str) -> Result<Vec<u8>, CommandError> {
        let target = name.to_string();
        self.with_repository(op, move |r| r.read(&target)).await
    }

    async fn with_repository<T, F>(&self, op: FileOp, f: F) -> Result<T, CommandError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Repository) -> Result<T, RepositoryError> + Send + 'static,
    {
        let repository = Arc::clone(&self.repository);
        match tokio::task::spawn_blocking(move || f(repository.as_ref())).await {
            Ok(result) => result.map_err(|e| CommandError::from_repository(op, e)),
            Err(e) => {
                error!("Repository task for {:?} did not complete: {}", op, e);
                Err(CommandError::Io(op))
            }
        }
    }
}

/// The session vanished from the manager under the dispatcher's feet.
fn session_gone() -> Reply {
    Reply::closing(
        "ERROR session closed",
        CloseReason::Failed(String::from("session not found")),
    )
}

fn joined(header: &str, names: &[String], separator: &str) -> String {
    if names.is_empty() {
        header.to_string()
    } else {
        format!("{} {}", header, names.join(separator))
    }
}

fn help_text(role: Role) -> String {
    let mut lines = vec![String::from("HELP")];
    lines.extend(Verb::ALL.iter().map(|verb| {
        let marker = match (verb.required_role(), role) {
            (Role::Admin, Role::Read) => " (ADMIN only)",
            _ => "",
        };
        format!("{}{}", verb.usage(), marker)
    }));
    lines.push(String::from("END"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::Admission;
    use crate::statistics::StatsAggregator;
    use crate::storage::{FileRepository, LogActivity};
    use std::net::SocketAddr;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repository: Arc<FileRepository>,
        dispatcher: Dispatcher,
        id: SessionId,
    }

    fn fixture_with(auth: AuthConfig, read_ack_delay: Option<Duration>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(FileRepository::new(dir.path()).unwrap());
        let manager = Arc::new(SessionManager::new(4, Arc::new(StatsAggregator::new())));
        let id = SessionId::from("127.0.0.1:6000".parse::<SocketAddr>().unwrap());
        assert!(matches!(manager.on_connect(id), Ok(Admission::Admitted)));

        let dispatcher = Dispatcher::new(
            manager,
            repository.clone(),
            Arc::new(LogActivity),
            auth,
            read_ack_delay,
        );
        Fixture {
            _dir: dir,
            repository,
            dispatcher,
            id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(AuthConfig::default(), None)
    }

    fn password_auth() -> AuthConfig {
        AuthConfig {
            mode: AuthMode::Password,
            admin_password: Some(String::from("s3cret")),
            max_admin_attempts: 3,
        }
    }

    impl Fixture {
        async fn send(&self, line: &str) -> Reply {
            self.dispatcher.dispatch(&self.id, line).await
        }

        async fn text(&self, line: &str) -> String {
            self.send(line).await.text
        }

        async fn as_admin(&self) {
            assert_eq!(
                self.text("HELLO root ADMIN").await,
                "OK Hello root. You are set as ADMIN."
            );
        }
    }

    #[tokio::test]
    async fn test_read_role_cannot_touch_repository() {
        let f = fixture();
        f.repository.write("keep.txt", b"keep").unwrap();
        assert_eq!(
            f.text("HELLO guest READ").await,
            "OK Hello guest. You are set as READ."
        );

        for line in [
            "LIST",
            "READ keep.txt",
            "UPLOAD new.txt aGk=",
            "DOWNLOAD keep.txt",
            "DELETE keep.txt",
            "SEARCH keep",
            "INFO keep.txt",
            "DELETE",
        ] {
            assert_eq!(f.text(line).await, "ERROR permission denied", "{}", line);
        }
        assert_eq!(f.repository.list().unwrap(), vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn test_unidentified_session_is_read_only() {
        let f = fixture();
        assert_eq!(f.text("/list").await, "ERROR permission denied");
        assert!(f.text("STATS").await.starts_with("STATS\n"));
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let f = fixture();
        f.as_admin().await;
        let payload: Vec<u8> = vec![0, 159, 146, 150, b'\n', 255];
        let encoded = STANDARD.encode(&payload);

        assert_eq!(
            f.text(&format!("UPLOAD blob.bin {}", encoded)).await,
            "UPLOAD_OK blob.bin"
        );
        let reply = f.text("DOWNLOAD blob.bin").await;
        let returned = reply.strip_prefix("DOWNLOAD blob.bin ").unwrap();
        assert_eq!(STANDARD.decode(returned).unwrap(), payload);

        let reply = f.text("READ blob.bin").await;
        assert_eq!(reply, format!("FILEDATA blob.bin {}", encoded));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_input() {
        let f = fixture();
        f.as_admin().await;
        assert_eq!(
            f.text("UPLOAD a.txt").await,
            "ERROR usage: UPLOAD <filename> <base64>"
        );
        assert_eq!(
            f.text("UPLOAD a.txt !!notbase64!!").await,
            "ERROR invalid base64 payload"
        );
        assert_eq!(
            f.text("UPLOAD ../escape.txt aGk=").await,
            "ERROR invalid filename"
        );
        assert!(f.repository.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_errors_are_distinct() {
        let f = fixture();
        f.as_admin().await;
        assert_eq!(f.text("READ ../etc/passwd").await, "ERROR invalid filename");
        assert_eq!(f.text("READ missing.txt").await, "ERROR file not found");
        assert_eq!(f.text("DOWNLOAD missing.txt").await, "ERROR file not found");
        assert_eq!(f.text("DELETE missing.txt").await, "ERROR file not found");
        assert_eq!(f.text("INFO missing.txt").await, "ERROR file not found");
    }

    #[tokio::test]
    async fn test_list_search_delete_info() {
        let f = fixture();
        f.as_admin().await;
        assert_eq!(f.text("LIST").await, "FILES");

        f.repository.write("a.txt", b"aaa").unwrap();
        f.repository.write("b.txt", b"b").unwrap();
        assert_eq!(f.text("LIST").await, "FILES a.txt, b.txt");
        assert_eq!(f.text("SEARCH TXT").await, "SEARCH_RESULTS a.txt,b.txt");
        assert_eq!(f.text("SEARCH nothing").await, "SEARCH_RESULTS");

        let info = f.text("INFO a.txt").await;
        assert!(info.starts_with("INFO a.txt size=3 created="), "{}", info);
        assert!(info.contains(" modified="));

        assert_eq!(f.text("DELETE a.txt").await, "DELETE_OK a.txt");
        assert_eq!(f.repository.list().unwrap(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_unknown_and_quit() {
        let f = fixture();
        assert_eq!(f.text("DANCE").await, "ERROR unknown command");

        let reply = f.send("quit").await;
        assert_eq!(reply.text, "BYE");
        assert_eq!(reply.close, Some(CloseReason::ClientQuit));
    }

    #[tokio::test]
    async fn test_second_hello_is_refused() {
        let f = fixture();
        f.text("HELLO ana READ").await;
        assert_eq!(
            f.text("HELLO ana ADMIN").await,
            "ERROR already identified as ana"
        );
        assert!(!f.dispatcher.manager().session(&f.id).unwrap().is_admin());
    }

    #[test]
    fn test_identity_change_on_closed_session_is_not_acknowledged() {
        let f = fixture_with(password_auth(), None);
        let session = f.dispatcher.manager().session(&f.id).unwrap();
        f.dispatcher.manager().on_session_closed(&f.id);

        let reply = f
            .dispatcher
            .hello(&f.id, &session, "ana", Role::Read)
            .unwrap();
        assert_eq!(reply.text, "ERROR session closed");
        assert!(matches!(reply.close, Some(CloseReason::Failed(_))));

        let reply = f.dispatcher.elevate(&f.id, &session, "s3cret").unwrap();
        assert_eq!(reply.text, "ERROR session closed");
        assert!(reply.close.is_some());
    }

    #[tokio::test]
    async fn test_admin_command_disabled_in_declared_mode() {
        let f = fixture();
        assert_eq!(
            f.text("ADMIN anything").await,
            "ERROR password elevation is disabled"
        );
    }

    #[tokio::test]
    async fn test_password_mode_requires_secret() {
        let f = fixture_with(password_auth(), None);
        assert_eq!(
            f.text("HELLO ana ADMIN").await,
            "OK Hello ana. ADMIN requires a password: send ADMIN <password>."
        );
        assert_eq!(f.text("LIST").await, "ERROR permission denied");

        assert_eq!(
            f.text("ADMIN wrong").await,
            "ERROR wrong password (attempt 1 of 3)"
        );
        assert_eq!(f.text("ADMIN s3cret").await, "OK You are now ADMIN.");
        assert_eq!(f.text("LIST").await, "FILES");
        assert_eq!(f.text("ADMIN s3cret").await, "OK You are already ADMIN.");

        let client = f.dispatcher.manager().stats().client(&f.id).unwrap();
        assert_eq!(client.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_third_wrong_password_closes() {
        let f = fixture_with(password_auth(), None);
        f.repository.write("keep.txt", b"keep").unwrap();

        for attempt in 1..3 {
            let reply = f.send("ADMIN guess").await;
            assert_eq!(
                reply.text,
                format!("ERROR wrong password (attempt {} of 3)", attempt)
            );
            assert!(reply.close.is_none());
            assert_eq!(f.text("DELETE keep.txt").await, "ERROR permission denied");
        }

        let reply = f.send("ADMIN guess").await;
        assert_eq!(reply.close, Some(CloseReason::AttemptsExhausted));
        assert!(reply.text.starts_with("ERROR wrong password"));
        assert_eq!(f.repository.list().unwrap(), vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn test_read_ack_is_deferred_only_for_read_role() {
        let delay = Duration::from_millis(250);
        let f = fixture_with(AuthConfig::default(), Some(delay));

        let reply = f.send("MSG hi all").await;
        assert_eq!(reply.text, "OK message received");
        assert_eq!(reply.delay, Some(delay));

        f.as_admin().await;
        assert_eq!(f.send("MSG hi again").await.delay, None);
        assert_eq!(f.send("STATS").await.delay, None);
    }

    #[tokio::test]
    async fn test_help_marks_admin_commands() {
        let f = fixture();
        let help = f.text("HELP").await;
        assert!(help.starts_with("HELP\n"));
        assert!(help.ends_with("\nEND"));
        assert!(help.contains("DELETE <filename> (ADMIN only)"));

        f.as_admin().await;
        assert!(!f.text("help").await.contains("ADMIN only"));
    }
}
