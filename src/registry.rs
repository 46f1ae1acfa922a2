//! Transaction correlation registry.
//!
//! One registry exists per relay engine and is shared by reference
//! between the send path and the listeners. It holds the only mutable
//! state in the crate: the three correlation maps and the pacing
//! timestamp, each behind its own lock so unrelated keys never block
//! each other.
//!
//! Map operations acquire their lock with a bounded wait; exceeding it
//! fails that one operation with [`RelayError::LockTimeout`] and leaves
//! the process running.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::Xid;
use crate::error::RelayError;

/// How long to back off between lock attempts.
const ACQUIRE_TICK: Duration = Duration::from_millis(1);

pub struct Registry {
    lock_wait: Duration,
    /// In-flight transaction ID -> subscriber MAC (registry key form).
    xid_mac: Mutex<HashMap<Xid, String>>,
    /// Subscriber MAC -> up flag. Absent = never requested,
    /// false = pending, true = up.
    subs_up: Mutex<HashMap<String, bool>>,
    /// Signalled whenever an up flag flips to true.
    subs_changed: Condvar,
    /// Subscriber MAC -> address offered by the server.
    mac_ip: Mutex<HashMap<String, Ipv4Addr>>,
    /// When the last packet left the relay; consulted by the send pacer.
    last_sent: Mutex<Option<Instant>>,
}

impl Registry {
    /// `lock_wait` bounds every map-lock acquisition. It is deliberately
    /// shorter than any subscriber-level deadline.
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            lock_wait,
            xid_mac: Mutex::new(HashMap::new()),
            subs_up: Mutex::new(HashMap::new()),
            subs_changed: Condvar::new(),
            mac_ip: Mutex::new(HashMap::new()),
            last_sent: Mutex::new(None),
        }
    }

    /// Record an in-flight transaction for a subscriber.
    pub fn bind_xid(&self, xid: Xid, mac: &str) -> Result<(), RelayError> {
        let mut map = self.lock_deadline(&self.xid_mac, "xid_mac")?;
        map.insert(xid, mac.to_string());
        Ok(())
    }

    /// Look up which subscriber a server reply correlates to.
    pub fn mac_for_xid(&self, xid: Xid) -> Result<Option<String>, RelayError> {
        let map = self.lock_deadline(&self.xid_mac, "xid_mac")?;
        Ok(map.get(&xid).cloned())
    }

    /// Drop a transaction, returning the MAC it belonged to, if any.
    pub fn unbind_xid(&self, xid: Xid) -> Result<Option<String>, RelayError> {
        let mut map = self.lock_deadline(&self.xid_mac, "xid_mac")?;
        Ok(map.remove(&xid))
    }

    /// Mark a subscriber as pending (DISCOVER sent, no ACK yet).
    pub fn mark_pending(&self, mac: &str) -> Result<(), RelayError> {
        let mut map = self.lock_deadline(&self.subs_up, "subs_up")?;
        map.insert(mac.to_string(), false);
        Ok(())
    }

    /// Mark a subscriber as up and wake every waiting caller.
    pub fn mark_up(&self, mac: &str) -> Result<(), RelayError> {
        let mut map = self.lock_deadline(&self.subs_up, "subs_up")?;
        map.insert(mac.to_string(), true);
        self.subs_changed.notify_all();
        Ok(())
    }

    /// Remove and return a subscriber's up flag.
    pub fn take_up(&self, mac: &str) -> Result<Option<bool>, RelayError> {
        let mut map = self.lock_deadline(&self.subs_up, "subs_up")?;
        Ok(map.remove(mac))
    }

    /// Block until the subscriber's up flag turns true or the deadline
    /// passes. The flag is left in place for the caller to pop.
    pub fn wait_up(&self, mac: &str, timeout: Duration) -> Result<(), RelayError> {
        let deadline = Instant::now() + timeout;
        let mut map = self.lock_deadline(&self.subs_up, "subs_up")?;
        while !map.get(mac).copied().unwrap_or(false) {
            let now = Instant::now();
            if now >= deadline {
                return Err(RelayError::SubscriberTimeout {
                    mac: mac.to_string(),
                });
            }
            let (guard, _timed_out) = self
                .subs_changed
                .wait_timeout(map, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            map = guard;
        }
        Ok(())
    }

    /// Record the address the server offered a subscriber.
    pub fn record_ip(&self, mac: &str, ip: Ipv4Addr) -> Result<(), RelayError> {
        let mut map = self.lock_deadline(&self.mac_ip, "mac_ip")?;
        map.insert(mac.to_string(), ip);
        Ok(())
    }

    /// Remove and return a subscriber's offered address.
    pub fn take_ip(&self, mac: &str) -> Result<Option<Ipv4Addr>, RelayError> {
        let mut map = self.lock_deadline(&self.mac_ip, "mac_ip")?;
        Ok(map.remove(mac))
    }

    /// The pacing timestamp. Held by the send pacer across its sleep and
    /// transmit so concurrent senders are serialized; this lock is not
    /// deadline-bounded because the hold time is the pacing gap itself.
    pub(crate) fn last_sent(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire a map lock within `lock_wait`, backing off between
    /// attempts. A poisoned lock is recovered: the maps hold plain data
    /// and a panicked holder cannot leave them logically torn.
    fn lock_deadline<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        map: &'static str,
    ) -> Result<MutexGuard<'a, T>, RelayError> {
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match mutex.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return Err(RelayError::LockTimeout { map });
            }
            thread::sleep(ACQUIRE_TICK);
        }
    }
}
