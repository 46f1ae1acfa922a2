//! The relay engine: subscriber lifecycle orchestration.
//!
//! The engine generates transaction IDs, registers pending transactions,
//! builds and paces outbound packets, and exposes the synchronous
//! bring-up / bring-down operations. The listeners drive the
//! OFFER -> REQUEST -> ACK side of each transaction concurrently.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::builder::DhcpBuilder;
use crate::config::RelayConfig;
use crate::domain::{DhcpMessageType, Xid};
use crate::error::RelayError;
use crate::pacer::SendPacer;
use crate::registry::Registry;
use crate::relay::Listener;
use crate::transport::UdpTransport;
use crate::validate;

pub struct RelayEngine {
    config: RelayConfig,
    registry: Arc<Registry>,
    builder: DhcpBuilder,
    transport: Arc<UdpTransport>,
    pacer: SendPacer,
    running: AtomicBool,
    /// Monotonic request ID used to correlate log lines per caller request.
    next_rid: AtomicU64,
}

impl RelayEngine {
    /// Construct an engine and bind its transport. A bind failure is
    /// fatal: the engine must not declare itself ready without a socket.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let registry = Arc::new(Registry::new(config.lock_wait));
        let transport = Arc::new(UdpTransport::bind(
            SocketAddrV4::new(config.relay_ip, config.client_port),
            SocketAddrV4::new(config.server_ip, config.server_port),
        )?);
        let builder = DhcpBuilder::new(config.relay_ip, config.server_id, config.max_hops);
        let pacer = SendPacer::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            config.rate_limit,
        );

        Ok(Self {
            config,
            registry,
            builder,
            transport,
            pacer,
            running: AtomicBool::new(false),
            next_rid: AtomicU64::new(1),
        })
    }

    /// Spawn the configured number of listener threads. All listeners
    /// block on the same socket; the kernel hands each datagram to
    /// exactly one of them.
    pub fn start(self: &Arc<Self>) -> Vec<thread::JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        (0..self.config.listeners)
            .map(|i| {
                let listener = Listener::new(Arc::clone(self));
                thread::Builder::new()
                    .name(format!("listener-{}", i))
                    .spawn(move || listener.run())
                    .expect("failed to spawn listener thread")
            })
            .collect()
    }

    /// Ask the listener loops to drain and exit at their next idle tick.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn transport(&self) -> &UdpTransport {
        &self.transport
    }

    /// Send a DHCPDISCOVER for a subscriber. Registers the transaction
    /// and the pending up-flag, substituting the configured dummy
    /// address when the caller requests none. Returns `true` iff the
    /// transmission was attempted without a validation or build error.
    pub fn send_discover(&self, mac: &str, ip: Option<&str>) -> bool {
        let rid = self.next_rid();
        let result = Self::parse_requested(ip)
            .and_then(|requested| self.try_discover(rid, mac, requested));
        match result {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "request #{}: cannot send DHCPDISCOVER for {}: {}",
                    rid, mac, e
                );
                false
            }
        }
    }

    /// Send the DHCPREQUEST follow-up for an offered address. Invoked by
    /// the listener when an OFFER arrives; a failure is logged and
    /// reported as `false` with no retry.
    pub fn send_request(&self, xid: Xid, mac: &str, ip: Ipv4Addr, lease_secs: u32) -> bool {
        info!("sending DHCPREQUEST for {} (XID {})", mac, xid);
        match self.try_request(xid, mac, ip, lease_secs) {
            Ok(()) => {
                info!("DHCPREQUEST sent for XID {}", xid);
                true
            }
            Err(e) => {
                error!("cannot send DHCPREQUEST for XID {}: {}", xid, e);
                false
            }
        }
    }

    /// Send a DHCPRELEASE for a subscriber. Fire-and-forget: DHCP
    /// defines no server reply to a release, so none is awaited.
    pub fn send_release(&self, mac: &str) {
        let rid = self.next_rid();
        let xid = Xid::generate();
        info!(
            "request #{}: sending DHCPRELEASE for {} (XID {})",
            rid, mac, xid
        );
        if let Err(e) = self.try_release(xid, mac) {
            error!(
                "request #{}: cannot send DHCPRELEASE for {}: {}",
                rid, mac, e
            );
        }
    }

    /// Bring one subscriber up and block until it has an address or the
    /// deadline passes. On timeout the transaction's registry entries
    /// are evicted, so a late OFFER or ACK cannot resurrect an up-flag
    /// nobody is waiting on.
    pub fn bring_subscriber_up(
        &self,
        mac: &str,
        ip: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Ipv4Addr, RelayError> {
        let timeout = timeout.unwrap_or(self.config.max_wait);
        let requested = Self::parse_requested(ip)?;
        let key = validate::normalize_mac(mac).ok_or_else(|| RelayError::Validation {
            field: "mac",
            value: mac.to_string(),
        })?;

        let rid = self.next_rid();
        let xid = match self.try_discover(rid, mac, requested) {
            Ok(xid) => xid,
            Err(e) => {
                error!(
                    "request #{}: cannot send DHCPDISCOVER for {}: {}",
                    rid, mac, e
                );
                return Err(e);
            }
        };

        match self.registry.wait_up(&key, timeout) {
            Ok(()) => {
                self.registry.take_up(&key)?;
                let assigned =
                    self.registry
                        .take_ip(&key)?
                        .ok_or_else(|| RelayError::MissingLease {
                            mac: mac.to_string(),
                        })?;
                info!(
                    "request #{}: subscriber {} is up with {}",
                    rid, mac, assigned
                );
                Ok(assigned)
            }
            Err(e) => {
                warn!("request #{}: subscriber {} did not come up: {}", rid, mac, e);
                self.evict(xid, &key);
                Err(e)
            }
        }
    }

    /// Best-effort bulk activation: one DISCOVER per MAC, no waiting.
    /// The send pacer is the only throttle. Always reports success.
    pub fn bring_subscribers_up<I, S>(&self, macs: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for mac in macs {
            self.send_discover(mac.as_ref(), None);
        }
        true
    }

    /// Release a subscriber. Always reports success: DHCPRELEASE has no
    /// required reply, so there is nothing to confirm.
    pub fn bring_subscriber_down(&self, mac: &str) -> bool {
        self.send_release(mac);
        true
    }

    fn next_rid(&self) -> u64 {
        self.next_rid.fetch_add(1, Ordering::Relaxed)
    }

    fn parse_requested(ip: Option<&str>) -> Result<Option<Ipv4Addr>, RelayError> {
        match ip {
            None => Ok(None),
            Some(s) => {
                if !validate::is_valid_ip(s) {
                    return Err(RelayError::Validation {
                        field: "ip",
                        value: s.to_string(),
                    });
                }
                Ok(s.parse().ok())
            }
        }
    }

    fn try_discover(
        &self,
        rid: u64,
        mac: &str,
        requested: Option<Ipv4Addr>,
    ) -> Result<Xid, RelayError> {
        let xid = Xid::generate();
        info!(
            "request #{}: sending DHCPDISCOVER for {} (XID {})",
            rid, mac, xid
        );

        let key = validate::normalize_mac(mac).ok_or_else(|| RelayError::Validation {
            field: "mac",
            value: mac.to_string(),
        })?;
        let hw = validate::parse_mac(mac).ok_or_else(|| RelayError::Validation {
            field: "mac",
            value: mac.to_string(),
        })?;

        self.registry.bind_xid(xid, &key)?;
        self.registry.mark_pending(&key)?;

        let requested = requested.unwrap_or(self.config.dummy_ip);
        let packet = self.builder.discover(xid, hw, Some(requested))?;
        self.pacer.send(&packet)?;
        Ok(xid)
    }

    fn try_request(
        &self,
        xid: Xid,
        mac: &str,
        ip: Ipv4Addr,
        lease_secs: u32,
    ) -> Result<(), RelayError> {
        let hw = validate::parse_mac(mac).ok_or_else(|| RelayError::Validation {
            field: "mac",
            value: mac.to_string(),
        })?;
        let packet = self.builder.request(xid, hw, ip, lease_secs)?;
        self.pacer.send(&packet)?;
        Ok(())
    }

    fn try_release(&self, xid: Xid, mac: &str) -> Result<(), RelayError> {
        let hw = validate::parse_mac(mac).ok_or_else(|| RelayError::Validation {
            field: "mac",
            value: mac.to_string(),
        })?;
        let packet = self
            .builder
            .build(DhcpMessageType::Release, xid, Some(hw))?;
        self.pacer.send(&packet)?;
        Ok(())
    }

    /// Best-effort removal of a transaction's registry entries; lock
    /// errors here are ignored.
    fn evict(&self, xid: Xid, key: &str) {
        let _ = self.registry.unbind_xid(xid);
        let _ = self.registry.take_up(key);
        let _ = self.registry.take_ip(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Instant;

    use crate::domain::{option_codes, DHCP_MAGIC_COOKIE};
    use crate::parser::DhcpParser;

    const MAC: &str = "aa:bb:cc:dd:ee:ff";
    const MAC_KEY: &str = "aabbccddeeff";

    /// Minimal BOOTREPLY echoing the request's XID.
    fn server_reply(request: &[u8], kind: u8, yiaddr: Ipv4Addr, lease: u32) -> Vec<u8> {
        let mut reply = vec![0u8; 300];
        reply[0] = 2; // BOOTREPLY
        reply[1] = 1;
        reply[2] = 6;
        reply[4..8].copy_from_slice(&request[4..8]);
        reply[16..20].copy_from_slice(&yiaddr.octets());
        reply[28..44].copy_from_slice(&request[28..44]);
        reply[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        reply[240] = option_codes::MESSAGE_TYPE;
        reply[241] = 1;
        reply[242] = kind;
        reply[243] = option_codes::LEASE_TIME;
        reply[244] = 4;
        reply[245..249].copy_from_slice(&lease.to_be_bytes());
        reply[249] = option_codes::END;
        reply
    }

    fn fake_server() -> UdpSocket {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        server
    }

    fn test_engine(server_port: u16) -> Arc<RelayEngine> {
        let mut config = RelayConfig::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST);
        config.server_port = server_port;
        config.client_port = 0;
        config.max_wait = Duration::from_secs(5);
        Arc::new(RelayEngine::new(config).unwrap())
    }

    #[test]
    fn full_discover_offer_request_ack_cycle() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());
        let _listeners = engine.start();

        let offered = Ipv4Addr::new(10, 1, 2, 3);
        let server_thread = thread::spawn(move || {
            let parser = DhcpParser::new();
            let mut buf = [0u8; 1500];

            let (len, from) = server.recv_from(&mut buf).unwrap();
            let discover = parser.parse(&buf[..len]).unwrap();
            assert_eq!(discover.message_type(), Some(DhcpMessageType::Discover));
            assert_eq!(discover.giaddr, Ipv4Addr::LOCALHOST);
            server
                .send_to(&server_reply(&buf[..len], 2, offered, 600), from)
                .unwrap();

            let (len, from) = server.recv_from(&mut buf).unwrap();
            let request = parser.parse(&buf[..len]).unwrap();
            assert_eq!(request.message_type(), Some(DhcpMessageType::Request));
            assert_eq!(request.xid, discover.xid);
            assert_eq!(request.requested_ip(), Some(offered));
            assert_eq!(request.lease_time(), Some(600));
            server
                .send_to(&server_reply(&buf[..len], 5, offered, 600), from)
                .unwrap();
        });

        let assigned = engine
            .bring_subscriber_up(MAC, None, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(assigned, offered);
        server_thread.join().unwrap();

        // The correlation state was consumed on the way out.
        assert_eq!(engine.registry().take_up(MAC_KEY).unwrap(), None);
        assert_eq!(engine.registry().take_ip(MAC_KEY).unwrap(), None);

        engine.shutdown();
    }

    #[test]
    fn discover_requests_the_dummy_address_by_default() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());

        assert!(engine.send_discover(MAC, None));

        let mut buf = [0u8; 1500];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        let discover = DhcpParser::new().parse(&buf[..len]).unwrap();
        assert_eq!(
            discover.requested_ip(),
            Some(engine.config().dummy_ip)
        );
    }

    #[test]
    fn bring_subscriber_up_times_out_without_a_server() {
        // Bound but silent: DISCOVERs vanish into it.
        let silent = fake_server();
        let engine = test_engine(silent.local_addr().unwrap().port());
        let _listeners = engine.start();

        let started = Instant::now();
        let result = engine.bring_subscriber_up(MAC, None, Some(Duration::from_millis(300)));
        assert!(matches!(result, Err(RelayError::SubscriberTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));

        // Timeout evicted the subscriber's registry entries.
        assert_eq!(engine.registry().take_up(MAC_KEY).unwrap(), None);
        assert_eq!(engine.registry().take_ip(MAC_KEY).unwrap(), None);

        engine.shutdown();
    }

    #[test]
    fn ack_without_an_offer_reports_a_missing_lease() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());
        let _listeners = engine.start();

        let server_thread = thread::spawn(move || {
            let mut buf = [0u8; 1500];
            let (len, from) = server.recv_from(&mut buf).unwrap();
            // Skip the OFFER and acknowledge directly.
            server
                .send_to(
                    &server_reply(&buf[..len], 5, Ipv4Addr::new(10, 1, 2, 3), 600),
                    from,
                )
                .unwrap();
        });

        let result = engine.bring_subscriber_up(MAC, None, Some(Duration::from_secs(5)));
        assert!(matches!(result, Err(RelayError::MissingLease { .. })));
        server_thread.join().unwrap();

        engine.shutdown();
    }

    #[test]
    fn invalid_mac_fails_without_sending() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());

        assert!(!engine.send_discover("aa:bb:cc", None));

        let result = engine.bring_subscriber_up("aa:bb:cc", None, None);
        assert!(matches!(
            result,
            Err(RelayError::Validation { field: "mac", .. })
        ));

        // Nothing reached the server.
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 1500];
        assert!(server.recv_from(&mut buf).is_err());
    }

    #[test]
    fn invalid_requested_ip_fails_validation() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());

        assert!(!engine.send_discover(MAC, Some("299.0.0.1")));
        let result = engine.bring_subscriber_up(MAC, Some("not-an-ip"), None);
        assert!(matches!(
            result,
            Err(RelayError::Validation { field: "ip", .. })
        ));
    }

    #[test]
    fn bring_subscriber_down_is_idempotent() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());

        assert!(engine.bring_subscriber_down(MAC));
        assert!(engine.bring_subscriber_down(MAC));

        // Two RELEASE packets went out, each with a fresh XID.
        let parser = DhcpParser::new();
        let mut buf = [0u8; 1500];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        let first = parser.parse(&buf[..len]).unwrap();
        assert_eq!(first.message_type(), Some(DhcpMessageType::Release));
        let (len, _) = server.recv_from(&mut buf).unwrap();
        let second = parser.parse(&buf[..len]).unwrap();
        assert_eq!(second.message_type(), Some(DhcpMessageType::Release));
        assert_ne!(first.xid, second.xid);
    }

    #[test]
    fn offer_correlates_to_the_matching_transaction() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());
        let _listeners = engine.start();

        // Two unrelated transactions in flight at once.
        assert!(engine.send_discover("aa:bb:cc:dd:ee:01", None));
        assert!(engine.send_discover("aa:bb:cc:dd:ee:02", None));

        let parser = DhcpParser::new();
        let mut buf = [0u8; 1500];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        let _first = parser.parse(&buf[..len]).unwrap();
        let (len, from) = server.recv_from(&mut buf).unwrap();
        let second = parser.parse(&buf[..len]).unwrap();
        let second_bytes = buf[..len].to_vec();

        // Offer against the second transaction only.
        let offered = Ipv4Addr::new(10, 9, 8, 7);
        server
            .send_to(&server_reply(&second_bytes, 2, offered, 600), from)
            .unwrap();

        // Exactly one follow-up REQUEST, carrying the second
        // transaction's XID and hardware address.
        let (len, _) = server.recv_from(&mut buf).unwrap();
        let request = parser.parse(&buf[..len]).unwrap();
        assert_eq!(request.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(request.xid, second.xid);
        assert_eq!(request.chaddr, second.chaddr);
        assert_eq!(request.requested_ip(), Some(offered));

        // And nothing else followed it.
        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        assert!(server.recv_from(&mut buf).is_err());

        engine.shutdown();
    }

    #[test]
    fn bulk_activation_dispatches_one_discover_per_mac() {
        let server = fake_server();
        let engine = test_engine(server.local_addr().unwrap().port());

        let macs = ["aa:bb:cc:dd:ee:01", "aa:bb:cc:dd:ee:02", "aa:bb:cc:dd:ee:03"];
        assert!(engine.bring_subscribers_up(macs));

        let parser = DhcpParser::new();
        let mut buf = [0u8; 1500];
        for _ in 0..macs.len() {
            let (len, _) = server.recv_from(&mut buf).unwrap();
            let packet = parser.parse(&buf[..len]).unwrap();
            assert_eq!(packet.message_type(), Some(DhcpMessageType::Discover));
        }
    }
}
