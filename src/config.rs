//! Relay configuration.
//!
//! One immutable value object carries everything the engine needs;
//! it is assembled before construction and never changes afterwards.
//! The loader understands a flat `key = value` file with `#` comments;
//! unknown keys are ignored so a shared config file can carry entries
//! for other tools.

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

const DEFAULT_SERVER_PORT: u16 = 67;
const DEFAULT_CLIENT_PORT: u16 = 67;
const DEFAULT_DUMMY_IP: Ipv4Addr = Ipv4Addr::new(172, 17, 17, 1);
const DEFAULT_LEASE_TIME: u32 = 24 * 3600;
const DEFAULT_MAX_HOPS: u8 = 1;
const DEFAULT_LISTENERS: usize = 1;
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3);
const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream DHCP server address.
    pub server_ip: Ipv4Addr,
    /// Option 54 value; defaults to the server address.
    pub server_id: Ipv4Addr,
    /// Upstream UDP port.
    pub server_port: u16,
    /// The relay's own (client-facing) address; giaddr and bind address.
    pub relay_ip: Ipv4Addr,
    /// Local bind port.
    pub client_port: u16,
    /// Placeholder requested address when the caller names none. The
    /// server is expected to allocate whatever it likes.
    pub dummy_ip: Ipv4Addr,
    /// Default lease seconds.
    pub lease_time: u32,
    /// Hop count stamped on synthesized packets.
    pub max_hops: u8,
    /// Listener thread count.
    pub listeners: usize,
    /// Default deadline for `bring_subscriber_up`.
    pub max_wait: Duration,
    /// Bound on registry lock acquisition; shorter than `max_wait`.
    pub lock_wait: Duration,
    /// Outbound packets per second; `None` disables pacing.
    pub rate_limit: Option<u32>,
    /// Log decoded inbound packets at debug level.
    pub detailed_log: bool,
}

impl RelayConfig {
    /// A config with defaults for everything but the two required
    /// addresses.
    pub fn new(server_ip: Ipv4Addr, relay_ip: Ipv4Addr) -> Self {
        Self {
            server_ip,
            server_id: server_ip,
            server_port: DEFAULT_SERVER_PORT,
            relay_ip,
            client_port: DEFAULT_CLIENT_PORT,
            dummy_ip: DEFAULT_DUMMY_IP,
            lease_time: DEFAULT_LEASE_TIME,
            max_hops: DEFAULT_MAX_HOPS,
            listeners: DEFAULT_LISTENERS,
            max_wait: DEFAULT_MAX_WAIT,
            lock_wait: DEFAULT_LOCK_WAIT,
            rate_limit: None,
            detailed_log: false,
        }
    }

    /// Load from a `key = value` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse config file content. `server_ip` and `relay_ip` are
    /// required; everything else falls back to its default.
    pub fn parse(content: &str) -> Result<Self, RelayError> {
        let mut server_ip = None;
        let mut server_id = None;
        let mut relay_ip = None;
        let mut server_port = DEFAULT_SERVER_PORT;
        let mut client_port = DEFAULT_CLIENT_PORT;
        let mut dummy_ip = DEFAULT_DUMMY_IP;
        let mut lease_time = DEFAULT_LEASE_TIME;
        let mut max_hops = DEFAULT_MAX_HOPS;
        let mut listeners = DEFAULT_LISTENERS;
        let mut max_wait = DEFAULT_MAX_WAIT;
        let mut lock_wait = DEFAULT_LOCK_WAIT;
        let mut rate_limit = None;
        let mut detailed_log = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "server_ip" => server_ip = Some(parse_value(key, value)?),
                "server_id" => server_id = Some(parse_value(key, value)?),
                "relay_ip" => relay_ip = Some(parse_value(key, value)?),
                "server_port" => server_port = parse_value(key, value)?,
                "client_port" => client_port = parse_value(key, value)?,
                "dummy_ip" => dummy_ip = parse_value(key, value)?,
                "lease_time" => lease_time = parse_value(key, value)?,
                "max_hops" => max_hops = parse_value(key, value)?,
                "listeners" => listeners = parse_value(key, value)?,
                "max_wait" => max_wait = Duration::from_secs(parse_value(key, value)?),
                "lock_wait_ms" => lock_wait = Duration::from_millis(parse_value(key, value)?),
                "rate_limit" => rate_limit = Some(parse_value(key, value)?),
                "detailed_log" => detailed_log = parse_value(key, value)?,
                _ => {}
            }
        }

        let server_ip: Ipv4Addr =
            server_ip.ok_or_else(|| RelayError::Config("missing server_ip".to_string()))?;
        let relay_ip =
            relay_ip.ok_or_else(|| RelayError::Config("missing relay_ip".to_string()))?;

        Ok(Self {
            server_ip,
            server_id: server_id.unwrap_or(server_ip),
            server_port,
            relay_ip,
            client_port,
            dummy_ip,
            lease_time,
            max_hops,
            listeners,
            max_wait,
            lock_wait,
            rate_limit,
            detailed_log,
        })
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RelayError> {
    value
        .parse()
        .map_err(|_| RelayError::Config(format!("invalid {}: '{}'", key, value)))
}
