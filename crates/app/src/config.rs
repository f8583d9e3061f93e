//! Hub tuning knobs.
//!
//! The daemon parses its TOML file into its own structure and hands the hub a
//! plain [`HubConfig`] with ready-to-use [`Duration`]s.

use std::time::Duration;

/// Timeouts and capacities used by the hub, its queues and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// How long `Hub::actuate` waits for the worker to apply a command.
    pub actuate_timeout: Duration,
    /// Upper bound for a single driver call (`connect`, `write`, `read`).
    pub io_timeout: Duration,
    /// Pending commands per thing before producers wait.
    pub queue_capacity: usize,
    /// How long a worker waits on an empty queue before re-checking its
    /// cancellation token and poll schedule.
    pub idle_timeout: Duration,
    /// How long `stop_worker` waits for a worker to exit before escalating.
    pub join_timeout: Duration,
    /// Shared deadline for all workers during `Hub::shutdown`.
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            actuate_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(1),
            queue_capacity: 64,
            idle_timeout: Duration::from_millis(100),
            join_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
