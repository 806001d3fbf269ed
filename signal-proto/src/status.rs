//! Body of the `/health` endpoint.

use serde::{Deserialize, Serialize};

/// Point-in-time relay status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Always `"ok"` while the relay is serving.
    pub status: String,
    /// Number of rooms known to the relay, empty ones included.
    pub rooms: usize,
    /// Subscribers across all rooms plus one per room with a publisher.
    pub active_connections: usize,
}

impl StatusReport {
    /// Builds a healthy report from registry counts.
    #[must_use]
    pub fn ok(rooms: usize, active_connections: usize) -> Self {
        Self {
            status: "ok".to_string(),
            rooms,
            active_connections,
        }
    }
}
