//! Pre-send guards for the values callers hand to the relay.
//!
//! All functions here are pure predicates or conversions; they never
//! mutate state and never log. Callers log and reject.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

/// A MAC address is valid iff, after stripping every non-hex character,
/// exactly 12 hex characters remain. Separator style does not matter:
/// `"AA:BB:CC:DD:EE:FF"`, `"aabb.ccdd.eeff"` and `"aabbccddeeff"` are
/// all the same address.
#[must_use]
pub fn is_valid_mac(mac: &str) -> bool {
    mac.chars().filter(char::is_ascii_hexdigit).count() == 12
}

/// A transaction ID is valid iff it has exactly 4 components; the
/// 0..=255 range of each component is carried by the element type.
#[must_use]
pub fn is_valid_xid(xid: &[u8]) -> bool {
    xid.len() == 4
}

/// An IP address is valid iff it parses as a dotted-quad IPv4 address.
#[must_use]
pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok()
}

/// Normalize a MAC address to its registry key form: 12 lowercase hex
/// characters, separators stripped. Returns `None` for anything that is
/// not a valid MAC.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    (hex.len() == 12).then_some(hex)
}

/// Parse a MAC address string into its 6 hardware bytes.
pub fn parse_mac(mac: &str) -> Option<MacAddr6> {
    let hex = normalize_mac(mac)?;
    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(MacAddr6::from(bytes))
}
