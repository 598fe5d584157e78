// OpenIGTLink device link
//
// - `codec`: header framing, CRC-64, TDATA decoding and STT_/STP_TDATA queries
// - `client`: TCP client implementing `DeviceLink`, feeding the bridge event queue

pub mod client;
pub mod codec;

pub use client::IgtlClient;
pub use codec::{Header, Message, TrackingElement};
