//! Signal relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, places each one in a named room
//! as the room's single streamer or as one of its viewers, and forwards
//! signaling messages between them.

pub mod config;
pub mod connection;
pub mod registry;
pub mod relay;
pub mod session;
