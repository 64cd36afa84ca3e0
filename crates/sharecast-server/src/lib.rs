//! sharecast-server: room coordination and signaling relay for screen sharing.
//!
//! Clients connect over WebSocket, join rooms, arbitrate a single sharer per
//! room and exchange WebRTC negotiation messages through the server. An
//! optional SFU path allocates media transports through a [`MediaEngine`].
//! Room state is also exposed read-only over HTTP.

pub mod connection;
pub mod connections;
pub mod coordinator;
pub mod http;
pub mod registry;
pub mod transport;

pub use connections::ConnectionIndex;
pub use coordinator::SessionCoordinator;
pub use registry::{RoomRegistry, RoomSnapshot, SharedRegistry};
pub use transport::{EngineHealth, InMemoryEngine, MediaEngine, TransportResourceManager};
