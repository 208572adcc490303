//! Real-time WebSocket gateway.

pub mod connection;
pub mod engine;
pub mod events;
pub mod registry;
pub mod router;
pub mod server;

pub use connection::{Connection, SessionHandle};
pub use engine::EventEngine;
