use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Scheduler buffer size must be a power of two (got {value}).")]
    BufferSizeNotPowerOfTwo { value: usize },
    #[error("Worker parallelism must be at least 1.")]
    ZeroParallelism,
    #[error("Stat interval must be at least 1 ms.")]
    ZeroStatInterval,
    #[error("{0}")]
    Message(String),
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        ConfigError::Message(value)
    }
}

impl From<&'static str> for ConfigError {
    fn from(value: &'static str) -> Self {
        ConfigError::Message(value.to_owned())
    }
}
