use clap::Parser;

use crate::config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MASTER_HOST, DEFAULT_MASTER_PORT, DEFAULT_MAX_RPS,
    DEFAULT_STAT_INTERVAL_MS, DEFAULT_THREADS, WorkerConfig,
};

/// Default per-iteration pause of the built-in smoke task.
const DEFAULT_TASK_SLEEP_MS: u64 = 100;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Coordinator-driven load-generation worker - joins a swarm master, hatches virtual clients at a paced rate, and streams per-endpoint stats back."
)]
pub struct WorkerArgs {
    /// Coordinator address
    #[arg(long = "master-host", default_value = DEFAULT_MASTER_HOST)]
    pub master_host: String,

    /// Coordinator port
    #[arg(long = "master-port", default_value_t = DEFAULT_MASTER_PORT)]
    pub master_port: u16,

    /// Scheduler queue capacity (must be a power of two)
    #[arg(long = "buffer-size", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Scheduler pool parallelism
    #[arg(long = "threads", default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// Stats flush cadence in milliseconds
    #[arg(long = "stat-interval", default_value_t = DEFAULT_STAT_INTERVAL_MS)]
    pub stat_interval_ms: u64,

    /// Node-id determinism seed (0 = random)
    #[arg(long = "random-seed", default_value_t = 0)]
    pub random_seed: u64,

    /// Global requests-per-second ceiling (0 = unlimited)
    #[arg(long = "max-rps", default_value_t = DEFAULT_MAX_RPS)]
    pub max_rps: u64,

    /// Per-iteration pause of the built-in smoke task (ms)
    #[arg(long = "task-sleep-ms", default_value_t = DEFAULT_TASK_SLEEP_MS)]
    pub task_sleep_ms: u64,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,
}

impl WorkerArgs {
    #[must_use]
    pub fn to_config(&self) -> WorkerConfig {
        WorkerConfig {
            master_host: self.master_host.clone(),
            master_port: self.master_port,
            buffer_size: self.buffer_size,
            threads: self.threads,
            stat_interval_ms: self.stat_interval_ms,
            random_seed: self.random_seed,
            max_rps: self.max_rps,
        }
    }
}
