use crate::error::{AppResult, ConfigError};

pub const DEFAULT_MASTER_HOST: &str = "127.0.0.1";
pub const DEFAULT_MASTER_PORT: u16 = 5557;
pub const DEFAULT_BUFFER_SIZE: usize = 32768;
pub const DEFAULT_THREADS: usize = 8;
pub const DEFAULT_STAT_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAX_RPS: u64 = 0;

/// Construction-time settings for a [`Worker`](crate::runner::Worker).
///
/// The scheduler queue capacity must be a power of two; everything else is
/// a plain knob with the defaults a coordinator deployment expects.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator address.
    pub master_host: String,
    /// Coordinator port.
    pub master_port: u16,
    /// Scheduler queue capacity (power of two).
    pub buffer_size: usize,
    /// Scheduler pool parallelism.
    pub threads: usize,
    /// Stats flush cadence in milliseconds.
    pub stat_interval_ms: u64,
    /// Node-id determinism seed; 0 picks a random identity.
    pub random_seed: u64,
    /// Global requests-per-second ceiling; 0 disables the gate.
    pub max_rps: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_host: DEFAULT_MASTER_HOST.to_owned(),
            master_port: DEFAULT_MASTER_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            threads: DEFAULT_THREADS,
            stat_interval_ms: DEFAULT_STAT_INTERVAL_MS,
            random_seed: 0,
            max_rps: DEFAULT_MAX_RPS,
        }
    }
}

impl WorkerConfig {
    pub fn master_addr(&self) -> String {
        format!("{}:{}", self.master_host, self.master_port)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size is not a power of two, or if the
    /// parallelism or stat interval is zero.
    pub fn validate(&self) -> AppResult<()> {
        if !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::BufferSizeNotPowerOfTwo {
                value: self.buffer_size,
            }
            .into());
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroParallelism.into());
        }
        if self.stat_interval_ms == 0 {
            return Err(ConfigError::ZeroStatInterval.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn default_config_is_valid() {
        let config = WorkerConfig::default();
        if let Err(err) = config.validate() {
            panic!("Default config failed validation: {}", err);
        }
        if config.master_addr() != "127.0.0.1:5557" {
            panic!("Unexpected default master addr: {}", config.master_addr());
        }
    }

    #[test]
    fn non_power_of_two_buffer_is_rejected() {
        let config = WorkerConfig {
            buffer_size: 1000,
            ..WorkerConfig::default()
        };
        match config.validate() {
            Err(AppError::Config(ConfigError::BufferSizeNotPowerOfTwo { value: 1000 })) => {}
            other => panic!("Expected power-of-two rejection, got {:?}", other),
        }
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let config = WorkerConfig {
            buffer_size: 0,
            ..WorkerConfig::default()
        };
        if config.validate().is_ok() {
            panic!("Expected zero buffer size to be rejected");
        }
    }

    #[test]
    fn zero_threads_and_interval_are_rejected() {
        let config = WorkerConfig {
            threads: 0,
            ..WorkerConfig::default()
        };
        if config.validate().is_ok() {
            panic!("Expected zero parallelism to be rejected");
        }

        let config = WorkerConfig {
            stat_interval_ms: 0,
            ..WorkerConfig::default()
        };
        if config.validate().is_ok() {
            panic!("Expected zero stat interval to be rejected");
        }
    }
}
