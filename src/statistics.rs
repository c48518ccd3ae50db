//! Process-wide traffic statistics.
//!
//! Components:
//! - `aggregator`: the ledger of per-client and cumulative counters.
//! - `types`: the read-only snapshot handed to clients, the console and sinks.
//! - `reporter`: the periodic task pushing snapshots to the configured sinks.

pub mod aggregator;
pub mod reporter;
pub mod types;

pub use aggregator::StatsAggregator;
pub use reporter::StatsReporter;
pub use types::{ClientStats, StatsSnapshot};
