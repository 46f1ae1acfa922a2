//! Domain models for DHCP relaying.
//!
//! This module contains the core domain types that are independent
//! of any infrastructure concerns.

mod dhcp;

pub(crate) use dhcp::{option_codes, DHCP_MAGIC_COOKIE};

pub use dhcp::{DhcpMessageType, DhcpOption, DhcpPacket, Xid};
