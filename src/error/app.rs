use thiserror::Error;

use super::{ConfigError, RunnerError, TransportError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config(err: impl Into<ConfigError>) -> Self {
        AppError::Config(err.into())
    }

    pub fn transport(err: impl Into<TransportError>) -> Self {
        AppError::Transport(err.into())
    }

    pub fn runner(err: impl Into<RunnerError>) -> Self {
        AppError::Runner(err.into())
    }
}

impl From<&'static str> for AppError {
    fn from(value: &'static str) -> Self {
        AppError::Message(value.to_owned())
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Message(value)
    }
}
