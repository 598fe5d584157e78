//! OpenIGTLink locator bridge.
//!
//! Connects to an OpenIGTLink tracking server, keeps a registry of the pose streams it
//! announces, and lets up to N locator channels bind those streams to named, coloured
//! markers in a scene. All state is owned by [`LocatorBridge`]; the TCP client feeds it
//! through an event queue.

pub mod bridge;
pub mod channel;
pub mod color;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod igtl;
pub mod marker;
pub mod registry;
pub mod scene;
pub mod types;

pub use bridge::{event_channel, ChannelView, EventReceiver, EventSender, LocatorBridge, PanelRefresh, PanelView};
pub use channel::{ChannelBinding, ChannelState, ReleaseBatch};
pub use color::{default_color, ColorMap, PALETTE};
pub use config::{ConfigError, LocatorConfig};
pub use connection::{Connected, ConnectionManager, RetryPolicy};
pub use device::{ControlQuery, DeviceLink, QueryKind};
pub use error::{ConnectionError, ErrorKind, LocatorError, LocatorResult};
pub use igtl::IgtlClient;
pub use marker::{MarkerLifecycle, ReleaseOutcome};
pub use registry::{StreamRegistry, TrackedStream};
pub use scene::{Scene, SceneGraph};
pub use types::*;
