//! DHCP packet building module.
//!
//! This module is responsible for encoding the relay's outbound
//! messages into RFC 2131 wire format.

mod dhcp_builder;

pub use dhcp_builder::DhcpBuilder;
