pub mod errors;
pub mod id;
pub mod media;
pub mod protocol;

pub use errors::{ConfigError, EngineError, ShareError, SignalError};
pub use id::{new_id, ConnectionId};
pub use media::{
    ConsumerParams, DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, TransportParams,
};
pub use protocol::{ClientMessage, Payload, ProtocolError, ServerMessage};

pub type Result<T> = std::result::Result<T, ShareError>;
