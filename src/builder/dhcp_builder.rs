//! DHCP packet builder implementation.
//!
//! Encodes the three message kinds the relay originates on behalf of
//! subscribers: DHCPDISCOVER, DHCPREQUEST and DHCPRELEASE. All packets
//! carry the relay's identity in `giaddr` and the upstream server in
//! option 54.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use crate::domain::{option_codes, DhcpMessageType, Xid, DHCP_MAGIC_COOKIE};
use crate::error::RelayError;

/// Fixed header size up to the options section.
const HEADER_SIZE: usize = 236;

/// Minimum BOOTP packet size; shorter packets are zero-padded up to it.
const BOOTP_MIN_SIZE: usize = 300;

/// IANA hardware type 29: IP and ARP over ISO 7816-3.
const HTYPE: u8 = 29;

/// Builder for the relay's outbound DHCP packets.
pub struct DhcpBuilder {
    /// The relay's own address, stamped into `giaddr`.
    relay_ip: Ipv4Addr,
    /// Option 54 value on every packet.
    server_id: Ipv4Addr,
    /// Hop count stamped on synthesized requests.
    max_hops: u8,
}

impl DhcpBuilder {
    pub fn new(relay_ip: Ipv4Addr, server_id: Ipv4Addr, max_hops: u8) -> Self {
        Self {
            relay_ip,
            server_id,
            max_hops,
        }
    }

    /// Build a bare packet of the given kind, with no request-specific
    /// options. Fails with [`RelayError::PacketType`] for any kind the
    /// relay does not originate.
    pub fn build(
        &self,
        kind: DhcpMessageType,
        xid: Xid,
        mac: Option<MacAddr6>,
    ) -> Result<Vec<u8>, RelayError> {
        Ok(Self::finish(self.base(kind, xid, mac)?))
    }

    /// Build a DHCPDISCOVER, optionally asking for a specific address.
    pub fn discover(
        &self,
        xid: Xid,
        mac: MacAddr6,
        requested_ip: Option<Ipv4Addr>,
    ) -> Result<Vec<u8>, RelayError> {
        let mut buf = self.base(DhcpMessageType::Discover, xid, Some(mac))?;
        if let Some(ip) = requested_ip {
            push_option(&mut buf, option_codes::REQUESTED_IP, &ip.octets());
        }
        Ok(Self::finish(buf))
    }

    /// Build the DHCPREQUEST follow-up for an offered address and lease.
    pub fn request(
        &self,
        xid: Xid,
        mac: MacAddr6,
        requested_ip: Ipv4Addr,
        lease_secs: u32,
    ) -> Result<Vec<u8>, RelayError> {
        let mut buf = self.base(DhcpMessageType::Request, xid, Some(mac))?;
        push_option(&mut buf, option_codes::REQUESTED_IP, &requested_ip.octets());
        push_option(&mut buf, option_codes::LEASE_TIME, &lease_secs.to_be_bytes());
        Ok(Self::finish(buf))
    }

    /// Fixed header plus the options every relay packet carries.
    fn base(
        &self,
        kind: DhcpMessageType,
        xid: Xid,
        mac: Option<MacAddr6>,
    ) -> Result<Vec<u8>, RelayError> {
        let message_type = match kind {
            DhcpMessageType::Discover | DhcpMessageType::Request | DhcpMessageType::Release => {
                kind.as_u8()
            }
            other => return Err(RelayError::PacketType(other)),
        };

        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0] = 1; // op: BOOTREQUEST
        buf[1] = HTYPE;
        buf[2] = 6; // hlen
        buf[3] = self.max_hops;
        buf[4..8].copy_from_slice(xid.bytes());
        // secs, flags, ciaddr, yiaddr, siaddr stay zero
        buf[24..28].copy_from_slice(&self.relay_ip.octets());
        if let Some(mac) = mac {
            // chaddr: 6 hardware bytes zero-padded to 16
            buf[28..34].copy_from_slice(mac.as_bytes());
        }

        buf.extend_from_slice(&DHCP_MAGIC_COOKIE);

        push_option(&mut buf, option_codes::MESSAGE_TYPE, &[message_type]);
        push_option(&mut buf, option_codes::SERVER_ID, &self.server_id.octets());

        if let Some(mac) = mac {
            // The MAC echoed as host name and client identifier is a
            // correlation aid for the upstream server's logs, not a
            // DHCP-standard requirement.
            let mac_str = compact_mac(mac);
            push_option(&mut buf, option_codes::HOST_NAME, mac_str.as_bytes());
            push_option(&mut buf, option_codes::CLIENT_ID, mac_str.as_bytes());
        }

        Ok(buf)
    }

    /// Terminate the options section and pad to the BOOTP minimum.
    fn finish(mut buf: Vec<u8>) -> Vec<u8> {
        buf.push(option_codes::END);
        if buf.len() < BOOTP_MIN_SIZE {
            buf.resize(BOOTP_MIN_SIZE, 0);
        }
        buf
    }
}

/// Append a single TLV option.
fn push_option(buf: &mut Vec<u8>, code: u8, data: &[u8]) {
    buf.push(code);
    buf.push(data.len() as u8);
    buf.extend_from_slice(data);
}

/// 12 lowercase hex characters, the same form the registry keys on.
fn compact_mac(mac: MacAddr6) -> String {
    mac.as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DhcpOption, DhcpPacket};
    use crate::parser::DhcpParser;

    fn builder() -> DhcpBuilder {
        DhcpBuilder::new(
            Ipv4Addr::new(192, 168, 4, 204),
            Ipv4Addr::new(172, 20, 8, 1),
            1,
        )
    }

    fn mac() -> MacAddr6 {
        MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
    }

    fn parse(bytes: &[u8]) -> DhcpPacket {
        DhcpParser::new().parse(bytes).unwrap()
    }

    #[test]
    fn discover_round_trips_through_the_parser() {
        let xid = Xid::new([10, 20, 30, 40]);
        let bytes = builder().discover(xid, mac(), None).unwrap();

        let packet = parse(&bytes);
        assert_eq!(packet.op, 1);
        assert_eq!(packet.htype, 29);
        assert_eq!(packet.hlen, 6);
        assert_eq!(packet.hops, 1);
        assert_eq!(packet.xid, xid);
        assert_eq!(packet.giaddr, Ipv4Addr::new(192, 168, 4, 204));
        assert_eq!(packet.chaddr, mac());
        assert_eq!(packet.message_type(), Some(DhcpMessageType::Discover));
        assert_eq!(
            packet.server_identifier(),
            Some(Ipv4Addr::new(172, 20, 8, 1))
        );
    }

    #[test]
    fn discover_carries_requested_ip_when_given() {
        let bytes = builder()
            .discover(
                Xid::new([1, 2, 3, 4]),
                mac(),
                Some(Ipv4Addr::new(172, 17, 17, 1)),
            )
            .unwrap();

        let packet = parse(&bytes);
        assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(172, 17, 17, 1)));
    }

    #[test]
    fn request_carries_offered_ip_and_lease() {
        let bytes = builder()
            .request(
                Xid::new([1, 2, 3, 4]),
                mac(),
                Ipv4Addr::new(10, 1, 2, 3),
                86400,
            )
            .unwrap();

        let packet = parse(&bytes);
        assert_eq!(packet.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(packet.lease_time(), Some(86400));
    }

    #[test]
    fn release_is_buildable_through_build() {
        let bytes = builder()
            .build(DhcpMessageType::Release, Xid::new([1, 2, 3, 4]), Some(mac()))
            .unwrap();

        let packet = parse(&bytes);
        assert_eq!(packet.message_type(), Some(DhcpMessageType::Release));
        assert_eq!(packet.chaddr, mac());
    }

    #[test]
    fn reply_kinds_are_rejected() {
        let result = builder().build(DhcpMessageType::Offer, Xid::new([1, 2, 3, 4]), None);
        assert!(matches!(result, Err(RelayError::PacketType(_))));

        let result = builder().build(DhcpMessageType::Ack, Xid::new([1, 2, 3, 4]), None);
        assert!(matches!(result, Err(RelayError::PacketType(_))));
    }

    #[test]
    fn packets_are_padded_to_the_bootp_minimum() {
        let bytes = builder()
            .build(DhcpMessageType::Release, Xid::new([1, 2, 3, 4]), None)
            .unwrap();
        assert!(bytes.len() >= 300);
    }

    #[test]
    fn mac_is_echoed_as_host_name_and_client_id() {
        let bytes = builder()
            .discover(Xid::new([1, 2, 3, 4]), mac(), None)
            .unwrap();

        let packet = parse(&bytes);
        assert!(packet
            .options
            .iter()
            .any(|o| matches!(o, DhcpOption::HostName(s) if s == "aabbccddeeff")));
        assert!(packet
            .options
            .iter()
            .any(|o| matches!(o, DhcpOption::ClientId(d) if d == b"aabbccddeeff")));
    }
}
