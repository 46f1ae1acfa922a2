//! subrelay - a DHCP relay agent for subscriber provisioning.
//!
//! The relay synthesizes DHCPDISCOVER/DHCPREQUEST/DHCPRELEASE packets
//! toward one upstream DHCP server on behalf of subscribers identified
//! only by MAC address, correlates the server's asynchronous
//! DHCPOFFER/DHCPACK replies back by transaction ID, and exposes
//! synchronous bring-up / bring-down operations to callers.

pub mod builder;
pub mod config;
pub mod domain;
pub mod error;
pub mod pacer;
pub mod parser;
pub mod registry;
pub mod relay;
pub mod transport;
pub mod validate;

pub use config::RelayConfig;
pub use domain::{DhcpMessageType, DhcpOption, DhcpPacket, Xid};
pub use error::{ParseError, RelayError};
pub use relay::{Listener, RelayEngine};
