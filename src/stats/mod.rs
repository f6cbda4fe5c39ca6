mod entry;

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::message::Payload;

pub use entry::SnapshotEntry;
use entry::EndpointStats;

/// Name used for the aggregate-across-endpoints entry.
const TOTAL_ENTRY_NAME: &str = "Total";

/// One grouped error line inside a `stats` frame.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotError {
    pub count: u64,
    pub method: String,
    pub name: String,
    pub error: String,
}

/// A serializable view of the aggregator state at one flush tick.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub stats: Vec<SnapshotEntry>,
    pub stats_total: SnapshotEntry,
    pub errors: BTreeMap<String, SnapshotError>,
}

impl Snapshot {
    /// Build the `stats` frame payload, inserting the runner-provided
    /// client count.
    #[must_use]
    pub fn into_payload(self, user_count: u64) -> Payload {
        let mut payload = Payload::new();
        payload.insert(
            "stats".to_owned(),
            serde_json::to_value(&self.stats).unwrap_or(Value::Null),
        );
        payload.insert(
            "stats_total".to_owned(),
            serde_json::to_value(&self.stats_total).unwrap_or(Value::Null),
        );
        payload.insert(
            "errors".to_owned(),
            serde_json::to_value(&self.errors).unwrap_or(Value::Null),
        );
        payload.insert("user_count".to_owned(), Value::from(user_count));
        payload
    }
}

enum StatsCommand {
    Success {
        method: String,
        name: String,
        response_time_ms: u64,
        response_length: u64,
    },
    Failure {
        method: String,
        name: String,
        response_time_ms: u64,
        error: String,
    },
    Clear,
}

/// Non-blocking handle used by task bodies (and the scheduler's failure
/// path) to report request outcomes.
#[derive(Clone)]
pub struct StatsRecorder {
    tx: mpsc::UnboundedSender<StatsCommand>,
}

impl StatsRecorder {
    pub fn success(&self, method: &str, name: &str, response_time_ms: u64, response_length: u64) {
        drop(self.tx.send(StatsCommand::Success {
            method: method.to_owned(),
            name: name.to_owned(),
            response_time_ms,
            response_length,
        }));
    }

    pub fn failure(&self, method: &str, name: &str, response_time_ms: u64, error: &str) {
        drop(self.tx.send(StatsCommand::Failure {
            method: method.to_owned(),
            name: name.to_owned(),
            response_time_ms,
            error: error.to_owned(),
        }));
    }

    /// Reset all aggregator state. Ordered with respect to reports already
    /// queued by the same caller.
    pub(crate) fn clear_all(&self) {
        drop(self.tx.send(StatsCommand::Clear));
    }
}

type SnapshotHandler = Box<dyn FnMut(Snapshot) + Send>;

/// The aggregator service: a single collector task owning every endpoint
/// entry, fed by recorder handles and flushing through `on_data` on a
/// fixed cadence.
pub(crate) struct StatsService {
    recorder: StatsRecorder,
    collector: JoinHandle<()>,
}

impl StatsService {
    pub(crate) fn start(stat_interval: Duration, on_data: SnapshotHandler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect(rx, stat_interval, on_data));
        Self {
            recorder: StatsRecorder { tx },
            collector,
        }
    }

    pub(crate) fn recorder(&self) -> StatsRecorder {
        self.recorder.clone()
    }

    pub(crate) fn dispose(&self) {
        self.collector.abort();
    }
}

async fn collect(
    mut rx: mpsc::UnboundedReceiver<StatsCommand>,
    stat_interval: Duration,
    mut on_data: SnapshotHandler,
) {
    let mut state = AggregationState::new();
    let mut flush_tick = interval_at(Instant::now() + stat_interval, stat_interval);
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_cmd = rx.recv() => match maybe_cmd {
                Some(cmd) => state.apply(cmd),
                None => break,
            },
            _ = flush_tick.tick() => {
                debug!(
                    "Flushing stats snapshot ({} endpoints, mean {} ms, var {})",
                    state.entries.len(),
                    state.total.mean_response_time(),
                    state.total.response_time_variance()
                );
                on_data(state.flush());
            }
        }
    }
}

/// All aggregator state, owned by the collector task. Kept separate from
/// the service so the flush and reset rules are testable without timers.
struct AggregationState {
    entries: BTreeMap<(String, String), EndpointStats>,
    total: EndpointStats,
    errors: BTreeMap<String, SnapshotError>,
}

impl AggregationState {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            total: EndpointStats::new("", TOTAL_ENTRY_NAME),
            errors: BTreeMap::new(),
        }
    }

    fn apply(&mut self, cmd: StatsCommand) {
        match cmd {
            StatsCommand::Success {
                method,
                name,
                response_time_ms,
                response_length,
            } => {
                let now_secs = current_epoch_secs();
                self.entry(&method, &name)
                    .record_success(response_time_ms, response_length, now_secs);
                self.total
                    .record_success(response_time_ms, response_length, now_secs);
            }
            StatsCommand::Failure {
                method,
                name,
                response_time_ms,
                error,
            } => {
                let now_secs = current_epoch_secs();
                self.entry(&method, &name)
                    .record_failure(response_time_ms, now_secs);
                self.total.record_failure(response_time_ms, now_secs);
                let key = format!("{}.{}.{}", method, name, error);
                let grouped = self.errors.entry(key).or_insert_with(|| SnapshotError {
                    count: 0,
                    method,
                    name,
                    error,
                });
                grouped.count = grouped.count.saturating_add(1);
            }
            StatsCommand::Clear => {
                self.entries.clear();
                self.errors.clear();
                self.total = EndpointStats::new("", TOTAL_ENTRY_NAME);
            }
        }
    }

    fn entry(&mut self, method: &str, name: &str) -> &mut EndpointStats {
        self.entries
            .entry((method.to_owned(), name.to_owned()))
            .or_insert_with(|| EndpointStats::new(method, name))
    }

    /// Produce a snapshot and reset the interval-scoped counters. Lifetime
    /// counters and the error map persist until the next `Clear`.
    fn flush(&mut self) -> Snapshot {
        let stats: Vec<SnapshotEntry> = self.entries.values().map(EndpointStats::snapshot).collect();
        let snapshot = Snapshot {
            stats,
            stats_total: self.total.snapshot(),
            errors: self.errors.clone(),
        };
        for entry in self.entries.values_mut() {
            entry.reset_interval();
        }
        self.total.reset_interval();
        snapshot
    }
}

fn current_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
