use std::net::SocketAddr;

use thiserror::Error;

use crate::domain::DhcpMessageType;

/// Errors produced while decoding an inbound DHCP packet.
///
/// The listener treats these as drop-and-continue; a malformed packet
/// from the network must never take down the relay.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },
}

/// Errors produced by the relay engine and its collaborators.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("cannot build a {0} packet: the relay only sends DHCPDISCOVER, DHCPREQUEST and DHCPRELEASE")]
    PacketType(DhcpMessageType),

    #[error("malformed packet: {0}")]
    Malformed(#[from] ParseError),

    #[error("invalid {field}: '{value}'")]
    Validation { field: &'static str, value: String },

    #[error("unable to bind relay socket at {addr}: {source}; check relay_ip and client_port in the configuration")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out acquiring the {map} registry lock")]
    LockTimeout { map: &'static str },

    #[error("no DHCPACK for subscriber {mac} before the deadline")]
    SubscriberTimeout { mac: String },

    #[error("subscriber {mac} came up without a recorded address")]
    MissingLease { mac: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
