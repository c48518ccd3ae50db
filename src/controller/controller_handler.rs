use super::console::OperatorConsole;
use crate::command::Dispatcher;
use crate::configuration::Config;
use crate::error_handling::types::ControllerError;
use crate::network::NetworkListener;
use crate::session_management::{SessionContext, SessionManager};
use crate::statistics::{StatsAggregator, StatsReporter};
use crate::storage::{
    ActivityLog, FileActivityLog, FileRepository, JsonStatsFile, LogActivity, LogStatsSink,
    StatsSink,
};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::watch;

/// How long connection tasks get to say goodbye after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Owns the shared server state and its lifecycle.
///
/// # Fields Overview
///
/// - `config`: validated runtime configuration
/// - `manager`: admission controller, also the route to the statistics
/// - `ctx`: what every session task is handed
/// - `shutdown_tx`: flipped to `true` once, by the console, Ctrl-C or
///   [`shutdown`](Self::shutdown)
pub struct Controller {
    pub config: Config,
    manager: Arc<SessionManager>,
    ctx: SessionContext,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Controller {
    /// Builds the shared state: repository root, activity log, statistics
    /// and dispatcher.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;

        let stats = Arc::new(StatsAggregator::new());
        let manager = Arc::new(SessionManager::new(config.max_sessions, stats));
        let repository = Arc::new(FileRepository::new(&config.repository_path)?);
        let activity: Arc<dyn ActivityLog> = match &config.activity_log {
            Some(path) => Arc::new(FileActivityLog::open(path)?),
            None => Arc::new(LogActivity),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&manager),
            repository,
            activity,
            config.auth.clone(),
            config.read_ack_delay(),
        ));
        let ctx = SessionContext {
            manager: Arc::clone(&manager),
            dispatcher,
            inactivity_timeout: config.inactivity_timeout(),
            max_line_bytes: config.max_line_bytes,
        };
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            "Controller ready: max {} session(s), auth mode {:?}, repository {}",
            manager.max_sessions(),
            config.auth.mode,
            config.repository_path.display()
        );
        Ok(Self {
            config,
            manager,
            ctx,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Asks every task to stop.
    pub fn shutdown(&self) {
        info!("Shutting down");
        self.shutdown_tx.send_replace(true);
    }

    /// Binds the configured address.
    pub async fn listen(&self) -> Result<NetworkListener, ControllerError> {
        let addr = self.config.socket_addr()?;
        let listener =
            NetworkListener::bind(addr, self.ctx.clone(), self.shutdown_tx.subscribe()).await?;
        Ok(listener)
    }

    /// Runs the server with the operator console on stdin and Ctrl-C
    /// handling until shutdown.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let listener = self.listen().await?;

        let console =
            OperatorConsole::new(Arc::clone(&self.manager), Arc::clone(&self.shutdown_tx));
        let console_task = tokio::spawn(async move {
            if let Err(e) = console
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
            {
                error!("[!] Console failed: {}", e);
            }
        });

        let signal_tx = Arc::clone(&self.shutdown_tx);
        let signal_task = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received");
                    signal_tx.send_replace(true);
                }
                Err(e) => error!("[!] Unable to listen for Ctrl-C: {}", e),
            }
        });

        let result = self.serve(listener).await;
        console_task.abort();
        signal_task.abort();
        result
    }

    /// Serves on an already bound listener until shutdown, then gives the
    /// connection tasks [`SHUTDOWN_GRACE`] to finish.
    pub async fn serve(&self, listener: NetworkListener) -> Result<(), ControllerError> {
        info!("Serving on {}", listener.local_addr()?);

        let reporter = self.config.stats_interval().map(|interval| {
            StatsReporter::new(Arc::clone(&self.manager), self.stats_sinks(), interval)
                .spawn(self.shutdown_tx.subscribe())
        });

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut listening = tokio::spawn(listener.start_listening());

        let finished_early = tokio::select! {
            joined = &mut listening => Some(joined),
            _ = stopped(&mut shutdown) => None,
        };

        let joined = match finished_early {
            Some(joined) => Some(joined),
            None => {
                info!(
                    "Stopping with {} active and {} queued connection(s)",
                    self.manager.active_count(),
                    self.manager.queued_count()
                );
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut listening).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        warn!(
                            "Connections still open after {:?}, closing them",
                            SHUTDOWN_GRACE
                        );
                        listening.abort();
                        None
                    }
                }
            }
        };

        if let Some(reporter) = reporter {
            self.shutdown_tx.send_replace(true);
            if let Err(e) = reporter.await {
                error!("[!] Statistics reporter failed: {}", e);
            }
        }

        match joined {
            Some(Ok(result)) => result.map_err(ControllerError::from),
            Some(Err(e)) => {
                error!("[!] Listener task failed: {}", e);
                Ok(())
            }
            None => Ok(()),
        }?;

        let last = self.manager.snapshot();
        info!(
            "Stopped after {} session(s): {} message(s), {} byte(s) in, {} byte(s) out",
            last.total_sessions, last.total_messages, last.total_bytes_in, last.total_bytes_out
        );
        Ok(())
    }

    fn stats_sinks(&self) -> Vec<Arc<dyn StatsSink>> {
        let mut sinks: Vec<Arc<dyn StatsSink>> = vec![Arc::new(LogStatsSink)];
        if let Some(path) = &self.config.stats_file {
            sinks.push(Arc::new(JsonStatsFile::new(path)));
        }
        sinks
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{AuthConfig, AuthMode};
    use crate::error_handling::types::ConfigError;
    use tempfile::TempDir;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config {
            max_sessions: 0,
            ..Config::default()
        };
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::NotInRange(_)))
        ));

        let config = Config {
            auth: AuthConfig {
                mode: AuthMode::Password,
                ..AuthConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::MissingValue(_)))
        ));
    }

    #[test]
    fn test_new_creates_repository_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        let controller = Controller::new(Config {
            repository_path: root.clone(),
            ..Config::default()
        })
        .unwrap();

        assert!(root.is_dir());
        assert_eq!(controller.manager().max_sessions(), 4);
        assert_eq!(controller.stats_sinks().len(), 1);
    }

    #[tokio::test]
    async fn test_serve_writes_stats_file_and_stops() {
        let dir = TempDir::new().unwrap();
        let stats_file = dir.path().join("stats.json");
        let controller = Arc::new(
            Controller::new(Config {
                bind_address: String::from("127.0.0.1"),
                port: 0,
                repository_path: dir.path().join("files"),
                stats_interval_secs: 1,
                stats_file: Some(stats_file.clone()),
                ..Config::default()
            })
            .unwrap(),
        );

        let listener = controller.listen().await.unwrap();
        let server = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.serve(listener).await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        controller.shutdown();
        server.await.unwrap().unwrap();

        assert!(stats_file.is_file());
    }
}
