// Device protocol collaborator
//
// A `DeviceLink` is the client side of the connection to the tracking device. It is
// started and stopped by the `ConnectionManager`, receives control queries from the
// `StreamRegistry`, and pushes `BridgeEvent`s onto the queue it was created with.
// The OpenIGTLink implementation lives in `crate::igtl`.

use crate::error::LocatorResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message family queried for tracking data
pub const TRACKING_DATA_TYPE: &str = "TDATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Prepared,
    Waiting,
    Success,
    Expired,
}

/// Request for the device to begin or end periodic pose announcements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlQuery {
    /// Message family, e.g. `TDATA`
    pub name: String,
    /// Device name filter; empty matches every device
    pub device_filter: String,
    pub kind: QueryKind,
    pub status: QueryStatus,
    /// Requested update interval for `Start` queries
    pub resolution_ms: u32,
}

impl ControlQuery {
    pub fn tracking(kind: QueryKind, resolution_ms: u32) -> Self {
        Self {
            name: TRACKING_DATA_TYPE.to_string(),
            device_filter: String::new(),
            kind,
            status: QueryStatus::Prepared,
            resolution_ms,
        }
    }
}

#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Point the link at a server; takes effect on the next `start`
    fn set_client_target(&mut self, host: &str, port: u16);

    /// Try once to open the connection. Returns true when the link is up.
    async fn start(&mut self) -> bool;

    /// Close the connection. Stopping a stopped link does nothing.
    async fn stop(&mut self);

    /// Send a control query; fire-and-forget, no acknowledgment is tracked
    async fn send_control_query(&mut self, query: &ControlQuery) -> LocatorResult<()>;

    fn is_connected(&self) -> bool;
}
