//! DHCP packet parser implementation.
//!
//! Parses raw DHCP packets according to RFC 2131. The relay feeds every
//! datagram received from the upstream server through this parser and
//! drops whatever fails to decode.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use crate::domain::{option_codes, DhcpMessageType, DhcpOption, DhcpPacket, Xid, DHCP_MAGIC_COOKIE};
use crate::error::ParseError;

/// Minimum DHCP packet size (fixed header, without options)
const MIN_DHCP_SIZE: usize = 236;

/// Parser for DHCP packets.
pub struct DhcpParser;

impl DhcpParser {
    /// Create a new DHCP parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse a DHCP packet from raw bytes.
    ///
    /// The input should be the UDP payload (not including IP/UDP headers).
    pub fn parse(&self, data: &[u8]) -> Result<DhcpPacket, ParseError> {
        if data.len() < MIN_DHCP_SIZE {
            return Err(ParseError::PacketTooShort {
                expected: MIN_DHCP_SIZE,
                actual: data.len(),
            });
        }

        // Fixed header fields
        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];
        let xid = Xid::new([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);

        let ciaddr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let siaddr = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let giaddr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        // Client hardware address (chaddr) - 16 bytes starting at offset 28.
        // The first 6 bytes are the MAC for hlen=6 hardware.
        let chaddr = MacAddr6::new(
            data[28], data[29], data[30], data[31], data[32], data[33],
        );

        // Server name (sname) - 64 bytes starting at offset 44
        let sname = Self::parse_null_terminated_string(&data[44..108]);

        // Boot filename (file) - 128 bytes starting at offset 108
        let file = Self::parse_null_terminated_string(&data[108..236]);

        // DHCP magic cookie at offset 236
        if data.len() < 240 {
            return Err(ParseError::PacketTooShort {
                expected: 240,
                actual: data.len(),
            });
        }

        if data[236..240] != DHCP_MAGIC_COOKIE {
            return Err(ParseError::InvalidMagicCookie);
        }

        // Options start at offset 240
        let options = self.parse_options(&data[240..])?;

        Ok(DhcpPacket {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Parse a null-terminated string, returning None if empty.
    fn parse_null_terminated_string(data: &[u8]) -> Option<String> {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        if end == 0 {
            return None;
        }

        String::from_utf8(data[..end].to_vec()).ok()
    }

    /// Parse DHCP options from the options section.
    fn parse_options(&self, data: &[u8]) -> Result<Vec<DhcpOption>, ParseError> {
        let mut options = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let code = data[offset];

            if code == option_codes::PAD {
                offset += 1;
                continue;
            }

            if code == option_codes::END {
                break;
            }

            // Regular option: code + length + data
            if offset + 1 >= data.len() {
                return Err(ParseError::InvalidOption {
                    offset,
                    message: "option length missing".to_string(),
                });
            }

            let len = data[offset + 1] as usize;

            if offset + 2 + len > data.len() {
                return Err(ParseError::InvalidOption {
                    offset,
                    message: format!(
                        "option data truncated: expected {} bytes, have {}",
                        len,
                        data.len() - offset - 2
                    ),
                });
            }

            let option_data = &data[offset + 2..offset + 2 + len];

            if let Some(option) = self.parse_option(code, option_data) {
                options.push(option);
            }

            offset += 2 + len;
        }

        Ok(options)
    }

    /// Parse a single DHCP option.
    fn parse_option(&self, code: u8, data: &[u8]) -> Option<DhcpOption> {
        match code {
            option_codes::MESSAGE_TYPE => {
                if data.is_empty() {
                    return None;
                }
                DhcpMessageType::from_u8(data[0]).map(DhcpOption::MessageType)
            }

            option_codes::REQUESTED_IP => {
                if data.len() < 4 {
                    return None;
                }
                Some(DhcpOption::RequestedIp(Ipv4Addr::new(
                    data[0], data[1], data[2], data[3],
                )))
            }

            option_codes::LEASE_TIME => {
                if data.len() < 4 {
                    return None;
                }
                Some(DhcpOption::LeaseTime(u32::from_be_bytes([
                    data[0], data[1], data[2], data[3],
                ])))
            }

            option_codes::SERVER_ID => {
                if data.len() < 4 {
                    return None;
                }
                Some(DhcpOption::ServerIdentifier(Ipv4Addr::new(
                    data[0], data[1], data[2], data[3],
                )))
            }

            option_codes::HOST_NAME => {
                String::from_utf8(data.to_vec()).ok().map(DhcpOption::HostName)
            }

            option_codes::CLIENT_ID => Some(DhcpOption::ClientId(data.to_vec())),

            _ => Some(DhcpOption::Unknown(code, data.to_vec())),
        }
    }
}

impl Default for DhcpParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal BOOTREPLY carrying the given message type, yiaddr and lease.
    fn build_reply(kind: u8, xid: [u8; 4], yiaddr: [u8; 4], lease: u32) -> Vec<u8> {
        let mut packet = vec![0u8; 300];
        packet[0] = 2; // BOOTREPLY
        packet[1] = 1;
        packet[2] = 6;
        packet[4..8].copy_from_slice(&xid);
        packet[16..20].copy_from_slice(&yiaddr);
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet[240] = option_codes::MESSAGE_TYPE;
        packet[241] = 1;
        packet[242] = kind;
        packet[243] = option_codes::LEASE_TIME;
        packet[244] = 4;
        packet[245..249].copy_from_slice(&lease.to_be_bytes());
        packet[249] = option_codes::END;
        packet
    }

    #[test]
    fn parse_offer_packet() {
        let parser = DhcpParser::new();
        let data = build_reply(2, [0x12, 0x34, 0x56, 0x78], [10, 1, 2, 3], 3600);

        let packet = parser.parse(&data).unwrap();
        assert_eq!(packet.op, 2);
        assert_eq!(packet.xid, Xid::new([0x12, 0x34, 0x56, 0x78]));
        assert_eq!(packet.yiaddr, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(
            packet.chaddr,
            MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
        );
        assert!(packet.is_offer());
        assert_eq!(packet.lease_time(), Some(3600));
    }

    #[test]
    fn parse_ack_packet() {
        let parser = DhcpParser::new();
        let data = build_reply(5, [1, 2, 3, 4], [10, 1, 2, 3], 600);

        let packet = parser.parse(&data).unwrap();
        assert!(packet.is_ack());
        assert!(!packet.is_offer());
    }

    #[test]
    fn packet_too_short() {
        let parser = DhcpParser::new();
        let data = vec![0u8; 100];

        let result = parser.parse(&data);
        assert!(matches!(result, Err(ParseError::PacketTooShort { .. })));
    }

    #[test]
    fn missing_magic_cookie() {
        let parser = DhcpParser::new();
        let mut data = build_reply(2, [1, 2, 3, 4], [10, 1, 2, 3], 600);
        data[236..240].copy_from_slice(&[0, 0, 0, 0]);

        let result = parser.parse(&data);
        assert!(matches!(result, Err(ParseError::InvalidMagicCookie)));
    }

    #[test]
    fn truncated_option_is_an_error() {
        let parser = DhcpParser::new();
        let mut data = build_reply(2, [1, 2, 3, 4], [10, 1, 2, 3], 600);
        data.truncate(245); // length byte of option 51 promises 4 bytes
        data[243] = option_codes::LEASE_TIME;
        data[244] = 4;

        let result = parser.parse(&data);
        assert!(matches!(result, Err(ParseError::InvalidOption { .. })));
    }

    #[test]
    fn pad_options_are_skipped() {
        let parser = DhcpParser::new();
        let mut data = build_reply(2, [1, 2, 3, 4], [10, 1, 2, 3], 600);
        // Shift the message type option behind a run of PAD bytes.
        data[240] = option_codes::PAD;
        data[241] = option_codes::PAD;
        data[242] = option_codes::MESSAGE_TYPE;
        data[243] = 1;
        data[244] = 2;
        data[245] = option_codes::END;

        let packet = parser.parse(&data).unwrap();
        assert!(packet.is_offer());
    }

    #[test]
    fn unknown_options_are_preserved() {
        let parser = DhcpParser::new();
        let mut data = build_reply(2, [1, 2, 3, 4], [10, 1, 2, 3], 600);
        data[249] = 200; // unknown code in place of END
        data[250] = 2;
        data[251] = 0xde;
        data[252] = 0xad;
        data[253] = option_codes::END;

        let packet = parser.parse(&data).unwrap();
        assert!(packet
            .options
            .iter()
            .any(|o| matches!(o, DhcpOption::Unknown(200, d) if d == &[0xde, 0xad])));
    }
}
