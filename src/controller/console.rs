use std::io;
use std::sync::Arc;

use log::{debug, info};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::session_management::SessionManager;

const CONSOLE_HELP: &str = "Commands:\n  STATS  print current statistics\n  EXIT   shut the server down\n  HELP   this text";

#[derive(Debug, PartialEq)]
enum ConsoleAction {
    Print(String),
    Exit,
}

/// Operator command loop, reading stdin in production.
pub struct OperatorConsole {
    manager: Arc<SessionManager>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl OperatorConsole {
    pub fn new(manager: Arc<SessionManager>, shutdown: Arc<watch::Sender<bool>>) -> Self {
        Self { manager, shutdown }
    }

    /// Serves operator lines until `EXIT` or end of input. End of input
    /// leaves the server running, so it keeps working when detached from a
    /// terminal.
    pub async fn run<R, W>(self, mut input: R, mut output: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line).await? == 0 {
                debug!("Console input closed");
                return Ok(());
            }

            match self.interpret(line.trim()) {
                Some(ConsoleAction::Print(text)) => {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
                Some(ConsoleAction::Exit) => {
                    info!("Shutdown requested from the console");
                    self.shutdown.send_replace(true);
                    return Ok(());
                }
                None => {}
            }
        }
    }

    fn interpret(&self, line: &str) -> Option<ConsoleAction> {
        if line.is_empty() {
            return None;
        }
        let command = line.strip_prefix('/').unwrap_or(line).to_ascii_uppercase();
        let action = match command.as_str() {
            "STATS" => ConsoleAction::Print(self.manager.snapshot().render()),
            "EXIT" | "QUIT" => ConsoleAction::Exit,
            "HELP" => ConsoleAction::Print(String::from(CONSOLE_HELP)),
            _ => ConsoleAction::Print(format!("Unknown command: {}", line)),
        };
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::StatsAggregator;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    fn console() -> (OperatorConsole, watch::Receiver<bool>) {
        let manager = Arc::new(SessionManager::new(3, Arc::new(StatsAggregator::new())));
        let (tx, rx) = watch::channel(false);
        (OperatorConsole::new(manager, Arc::new(tx)), rx)
    }

    #[tokio::test]
    async fn test_stats_then_exit() {
        let (console, rx) = console();
        let input = Builder::new().read(b"stats\n").read(b"\n").read(b"/exit\n").build();
        let mut output = Vec::new();

        console.run(BufReader::new(input), &mut output).await.unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.starts_with("STATS\n"));
        assert!(printed.contains("active_connections: 0"));
        assert!(printed.trim_end().ends_with("END"));
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_end_of_input_keeps_running() {
        let (console, rx) = console();
        let input = Builder::new().read(b"dance\n").build();
        let mut output = Vec::new();

        console.run(BufReader::new(input), &mut output).await.unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "Unknown command: dance\n");
        assert!(!*rx.borrow());
    }
}
