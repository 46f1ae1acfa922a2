//! DHCP packet domain models.
//!
//! These types represent the logical structure of DHCP packets as the
//! relay sees them, independent of wire format encoding and parsing.

use std::fmt;
use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use rand::Rng;

/// DHCP magic cookie: 0x63825363
pub(crate) const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// DHCP option codes used by the relay.
pub(crate) mod option_codes {
    pub const PAD: u8 = 0;
    pub const END: u8 = 255;
    pub const HOST_NAME: u8 = 12;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const CLIENT_ID: u8 = 61;
}

/// DHCP message types as defined in RFC 2131.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    /// The DHCP option 53 value for this message type.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

impl fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "DHCPDISCOVER"),
            Self::Offer => write!(f, "DHCPOFFER"),
            Self::Request => write!(f, "DHCPREQUEST"),
            Self::Decline => write!(f, "DHCPDECLINE"),
            Self::Ack => write!(f, "DHCPACK"),
            Self::Nak => write!(f, "DHCPNAK"),
            Self::Release => write!(f, "DHCPRELEASE"),
            Self::Inform => write!(f, "DHCPINFORM"),
        }
    }
}

/// A DHCP transaction ID: 4 independent bytes chosen by the sender of a
/// DISCOVER/REQUEST/RELEASE and echoed by the server in OFFER/ACK.
///
/// Random generation gives only partial collision resistance under load;
/// colliding in-flight transactions are not detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xid([u8; 4]);

impl Xid {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random transaction ID.
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// From the big-endian `xid` wire field.
    pub fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// As the big-endian `xid` wire field.
    pub fn as_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// DHCP options the relay cares about.
#[derive(Debug, Clone)]
pub enum DhcpOption {
    /// Option 53: DHCP Message Type
    MessageType(DhcpMessageType),
    /// Option 50: Requested IP Address
    RequestedIp(Ipv4Addr),
    /// Option 51: IP Address Lease Time (seconds)
    LeaseTime(u32),
    /// Option 54: Server Identifier
    ServerIdentifier(Ipv4Addr),
    /// Option 12: Host Name (the relay echoes the subscriber MAC here)
    HostName(String),
    /// Option 61: Client Identifier
    ClientId(Vec<u8>),
    /// Unknown option (code, data)
    Unknown(u8, Vec<u8>),
}

/// A parsed DHCP packet with the fields relevant to relay correlation.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// Operation: 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    /// Hardware type
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    /// Relay hop count
    pub hops: u8,
    /// Transaction ID
    pub xid: Xid,
    /// Seconds elapsed
    pub secs: u16,
    /// Flags
    pub flags: u16,
    /// Client IP address (if already known)
    pub ciaddr: Ipv4Addr,
    /// 'Your' IP address (assigned by server)
    pub yiaddr: Ipv4Addr,
    /// Server IP address
    pub siaddr: Ipv4Addr,
    /// Gateway (relay agent) IP address
    pub giaddr: Ipv4Addr,
    /// Client hardware address (MAC)
    pub chaddr: MacAddr6,
    /// Server hostname (optional)
    pub sname: Option<String>,
    /// Boot filename (optional)
    pub file: Option<String>,
    /// DHCP options
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// Get the DHCP message type from options.
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::MessageType(msg_type) = opt {
                Some(*msg_type)
            } else {
                None
            }
        })
    }

    /// Returns true if this is a DHCPOFFER.
    pub fn is_offer(&self) -> bool {
        self.message_type() == Some(DhcpMessageType::Offer)
    }

    /// Returns true if this is a DHCPACK.
    pub fn is_ack(&self) -> bool {
        self.message_type() == Some(DhcpMessageType::Ack)
    }

    /// Get the lease time in seconds (Option 51).
    pub fn lease_time(&self) -> Option<u32> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::LeaseTime(secs) = opt {
                Some(*secs)
            } else {
                None
            }
        })
    }

    /// Get the requested IP address (Option 50).
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::RequestedIp(ip) = opt {
                Some(*ip)
            } else {
                None
            }
        })
    }

    /// Get the server identifier (Option 54).
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| {
            if let DhcpOption::ServerIdentifier(ip) = opt {
                Some(*ip)
            } else {
                None
            }
        })
    }
}
