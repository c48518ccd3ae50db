use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Idle timer of one session.
///
/// The deadline moves forward on every [`touch`](Self::touch). The monitor
/// owns no task: [`expired`](Self::expired) is polled from the session loop,
/// so dropping the session drops the timer with it.
#[derive(Debug)]
pub struct InactivityMonitor {
    window: Option<Duration>,
    deadline: Option<Instant>,
}

impl InactivityMonitor {
    /// `None` disables the monitor.
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            deadline: window.map(|w| Instant::now() + w),
        }
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    pub fn touch(&mut self) {
        if let Some(window) = self.window {
            self.deadline = Some(Instant::now() + window);
        }
    }

    /// Completes when the window has passed without a touch. Never completes
    /// for a disabled monitor.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_window() {
        let monitor = InactivityMonitor::new(Some(Duration::from_secs(20)));
        let started = Instant::now();
        monitor.expired().await;
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_pushes_deadline() {
        let mut monitor = InactivityMonitor::new(Some(Duration::from_secs(10)));
        advance(Duration::from_secs(8)).await;
        monitor.touch();

        let early = timeout(Duration::from_secs(9), monitor.expired()).await;
        assert!(early.is_err());

        let late = timeout(Duration::from_secs(2), monitor.expired()).await;
        assert!(late.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_monitor_never_fires() {
        let mut monitor = InactivityMonitor::new(None);
        monitor.touch();
        assert!(monitor.window().is_none());
        let result = timeout(Duration::from_secs(3600), monitor.expired()).await;
        assert!(result.is_err());
    }
}
