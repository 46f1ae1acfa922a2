//! Outbound send pacing.
//!
//! Bulk-activating many subscribers would otherwise flood the upstream
//! server with back-to-back packets. The pacer enforces a minimum gap
//! between consecutive transmissions across the whole relay instance;
//! it is not a distributed rate limiter.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::registry::Registry;
use crate::transport::UdpTransport;

pub struct SendPacer {
    registry: Arc<Registry>,
    transport: Arc<UdpTransport>,
    min_gap: Option<Duration>,
}

impl SendPacer {
    /// `rate_limit` is the permitted outbound packets per second; the
    /// minimum inter-send gap is its reciprocal. `None` (or zero)
    /// disables pacing.
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<UdpTransport>,
        rate_limit: Option<u32>,
    ) -> Self {
        let min_gap = rate_limit
            .filter(|rate| *rate > 0)
            .map(|rate| Duration::from_secs_f64(1.0 / f64::from(rate)));
        Self {
            registry,
            transport,
            min_gap,
        }
    }

    /// Sleep out the remainder of the pacing gap, transmit, and record
    /// the send time. The pacing lock is held throughout so concurrent
    /// senders queue behind each other and the gap holds pairwise.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut last_sent = self.registry.last_sent();
        if let (Some(gap), Some(previous)) = (self.min_gap, *last_sent) {
            let elapsed = previous.elapsed();
            if elapsed < gap {
                thread::sleep(gap - elapsed);
            }
        }
        self.transport.send(bytes)?;
        *last_sent = Some(Instant::now());
        Ok(())
    }
}
