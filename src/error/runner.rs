use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Received `hatch` in state {state}.")]
    IllegalHatch { state: &'static str },
    #[error("Worker started without registered prototypes.")]
    NotRegistered,
    #[error("Hatch payload is missing field `{field}`.")]
    HatchFieldMissing { field: &'static str },
    #[error("Hatch payload field `{field}` is invalid.")]
    HatchFieldInvalid { field: &'static str },
    #[error("{0}")]
    Message(String),
}

impl From<String> for RunnerError {
    fn from(value: String) -> Self {
        RunnerError::Message(value)
    }
}

impl From<&'static str> for RunnerError {
    fn from(value: &'static str) -> Self {
        RunnerError::Message(value.to_owned())
    }
}
