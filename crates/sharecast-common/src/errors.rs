use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failure reported by the external media engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("transport allocation failed: {0}")]
    Allocation(String),

    #[error("unknown engine handle: {0}")]
    UnknownHandle(String),

    #[error("engine call failed: {0}")]
    Call(String),

    #[error("media engine is not running")]
    Dead,
}

/// Errors raised while handling a signaling event.
///
/// Everything here is non-fatal: the coordinator either reports it to the
/// sender (`error` frame or `response.error`) or drops the event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport not found: {0}")]
    TransportNotFound(String),

    #[error("incompatible rtp capabilities for producer {0}")]
    IncompatibleCapabilities(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("fatal: {0}")]
    Fatal(String),
}
