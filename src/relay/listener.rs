//! Inbound packet listener.
//!
//! Each listener pulls the next datagram from the shared relay socket,
//! decodes it, correlates it to a subscriber through the registry, and
//! advances that subscriber's state: an OFFER triggers the follow-up
//! REQUEST, an ACK marks the subscriber up.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::domain::{DhcpMessageType, DhcpPacket};
use crate::parser::DhcpParser;
use crate::relay::RelayEngine;

pub struct Listener {
    engine: Arc<RelayEngine>,
    parser: DhcpParser,
}

impl Listener {
    pub fn new(engine: Arc<RelayEngine>) -> Self {
        Self {
            engine,
            parser: DhcpParser::new(),
        }
    }

    /// Consume inbound packets until the engine shuts down.
    pub fn run(&self) {
        let mut buf = [0u8; 1500];
        while self.engine.is_running() {
            let (len, _from) = match self.engine.transport().recv_next(&mut buf) {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(e) => {
                    error!("receive error: {}", e);
                    continue;
                }
            };
            match self.parser.parse(&buf[..len]) {
                Ok(packet) => self.handle(&packet),
                // malformed traffic from the network is dropped, never fatal
                Err(e) => debug!("dropping malformed packet: {}", e),
            }
        }
    }

    fn handle(&self, packet: &DhcpPacket) {
        let registry = self.engine.registry();
        let xid = packet.xid;
        let mac = match registry.mac_for_xid(xid) {
            Ok(mac) => mac,
            Err(e) => {
                error!("cannot correlate XID {}: {}", xid, e);
                return;
            }
        };

        let Some(kind) = packet.message_type() else {
            debug!("ignoring packet without a message type (XID {})", xid);
            return;
        };

        match kind {
            DhcpMessageType::Offer => {
                if let Some(mac) = &mac {
                    let offered = packet.yiaddr;
                    let lease = packet
                        .lease_time()
                        .unwrap_or(self.engine.config().lease_time);
                    if let Err(e) = registry.record_ip(mac, offered) {
                        error!("cannot record offered address for {}: {}", mac, e);
                        return;
                    }
                    self.engine.send_request(xid, mac, offered, lease);
                }
            }
            DhcpMessageType::Ack => {
                if let Err(e) = registry.unbind_xid(xid) {
                    error!("cannot drop transaction {}: {}", xid, e);
                }
                if let Some(mac) = &mac {
                    if let Err(e) = registry.mark_up(mac) {
                        error!("cannot mark {} up: {}", mac, e);
                    }
                }
            }
            other => {
                debug!("ignoring {} (XID {})", other, xid);
                return;
            }
        }

        info!(
            "received {} from server for XID {}, subscriber {}",
            kind,
            xid,
            mac.as_deref().unwrap_or("unknown")
        );
        if self.engine.config().detailed_log {
            debug!("packet structure: {:?}", packet);
        }
    }
}
