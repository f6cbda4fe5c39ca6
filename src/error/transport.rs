use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Frame exceeded max size ({max_bytes} bytes).")]
    FrameTooLarge { max_bytes: usize },
    #[error("Frame was not valid UTF-8: {source}")]
    FrameInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Coordinator event channel closed.")]
    EventChannelClosed,
    #[error("{0}")]
    Message(String),
}

impl From<String> for TransportError {
    fn from(value: String) -> Self {
        TransportError::Message(value)
    }
}

impl From<&'static str> for TransportError {
    fn from(value: &'static str) -> Self {
        TransportError::Message(value.to_owned())
    }
}
