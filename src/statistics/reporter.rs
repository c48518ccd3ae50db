use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::session_management::SessionManager;
use crate::storage::StatsSink;

/// Pushes a statistics snapshot to every sink on a fixed interval.
///
/// Sink failures are logged and the next tick tries again.
pub struct StatsReporter {
    manager: Arc<SessionManager>,
    sinks: Vec<Arc<dyn StatsSink>>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(
        manager: Arc<SessionManager>,
        sinks: Vec<Arc<dyn StatsSink>>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            sinks,
            interval,
        }
    }

    /// Takes one snapshot and hands it to every sink. Returns how many sinks
    /// accepted it.
    pub fn report_once(&self) -> usize {
        let snapshot = self.manager.snapshot();
        let mut accepted = 0;
        for sink in &self.sinks {
            match sink.persist(&snapshot) {
                Ok(()) => accepted += 1,
                Err(e) => warn!("Statistics sink failed: {}", e),
            }
        }
        accepted
    }

    /// Reports every interval until `shutdown` flips to `true`. The first
    /// report is one interval after the call.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let accepted = self.report_once();
                        debug!("Statistics reported to {} sink(s)", accepted);
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Statistics reporter stopped");
        })
    }
}
