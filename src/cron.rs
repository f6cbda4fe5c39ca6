use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::AppResult;
use crate::stats::StatsRecorder;

/// A user-supplied virtual-client behavior.
///
/// An implementation is registered once as a prototype, cloned per virtual
/// client during hatching, and then executed in a loop by the scheduler
/// until the coordinator stops the swarm. `initialize` runs once per clone
/// before its first execution; `dispose` runs when the clone is retired.
///
/// An `Err` from `execute` is converted into a failure outcome by the pool
/// worker and the loop continues.
#[async_trait]
pub trait Cron: Send + Sync {
    /// Identifier used in stat reports.
    fn name(&self) -> &str;

    /// Relative spawn proportion; non-negative.
    fn weight(&self) -> f64;

    /// Produce a fresh instance whose state is independent of this one.
    fn clone_cron(&self) -> Box<dyn Cron>;

    async fn initialize(&mut self, _ctx: &CronContext) {}

    async fn execute(&mut self, ctx: &CronContext) -> AppResult<()>;

    fn dispose(&mut self) {}
}

/// Per-clone execution handle: the stats recorder plus a cancellation flag
/// scoped to the hatching epoch the clone belongs to.
///
/// Long-running task bodies are encouraged to poll [`CronContext::is_cancelled`]
/// between steps; the scheduler never forcibly interrupts an execution.
#[derive(Clone)]
pub struct CronContext {
    recorder: StatsRecorder,
    current_epoch: Arc<AtomicU64>,
    epoch: u64,
}

impl CronContext {
    pub(crate) fn new(recorder: StatsRecorder, current_epoch: Arc<AtomicU64>, epoch: u64) -> Self {
        Self {
            recorder,
            current_epoch,
            epoch,
        }
    }

    /// Record one successful request.
    pub fn record_success(
        &self,
        endpoint_type: &str,
        name: &str,
        response_time_ms: u64,
        response_length: u64,
    ) {
        self.recorder
            .success(endpoint_type, name, response_time_ms, response_length);
    }

    /// Record one failed request.
    pub fn record_failure(
        &self,
        endpoint_type: &str,
        name: &str,
        response_time_ms: u64,
        error: &str,
    ) {
        self.recorder
            .failure(endpoint_type, name, response_time_ms, error);
    }

    /// True once the swarm this clone belongs to has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.current_epoch.load(Ordering::Acquire) != self.epoch
    }
}
