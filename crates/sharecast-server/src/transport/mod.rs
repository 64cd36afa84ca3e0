//! SFU media plumbing: the engine boundary and per-session resource tracking.

pub mod engine;
pub mod manager;
pub mod memory;

pub use engine::{wait_for_death, EngineHealth, MediaEngine};
pub use manager::TransportResourceManager;
pub use memory::InMemoryEngine;
