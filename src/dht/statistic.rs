//! Peer liveness module
//!
//! Tracks how often a peer in the peer map answered or failed to answer.

use crate::dht::address::PeerAddress;
use std::time::{Duration, Instant};

/// Liveness record of one peer in the peer map
#[derive(Debug, Clone)]
pub struct PeerStatistic {
    /// Current address of the peer
    peer_address: PeerAddress,
    /// When the peer entered the map
    created: Instant,
    /// When the peer last answered us
    last_seen_online: Option<Instant>,
    /// Successful contacts
    successes: u32,
    /// Failed contacts since the last success
    failures: u32,
}

impl PeerStatistic {
    /// Create a new statistic for a peer that was just reported
    pub fn new(peer_address: PeerAddress) -> Self {
        Self {
            peer_address,
            created: Instant::now(),
            last_seen_online: None,
            successes: 0,
            failures: 0,
        }
    }

    /// Record a successful contact. Clears the failure counter.
    pub fn successfully_checked(&mut self) {
        self.last_seen_online = Some(Instant::now());
        self.successes = self.successes.saturating_add(1);
        self.failures = 0;
    }

    /// Record a failed contact and return the new failure count
    pub fn failed(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub fn peer_address(&self) -> &PeerAddress {
        &self.peer_address
    }

    /// Replace the stored address, returning the old one
    pub fn set_peer_address(&mut self, peer_address: PeerAddress) -> PeerAddress {
        std::mem::replace(&mut self.peer_address, peer_address)
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_seen_online(&self) -> Option<Instant> {
        self.last_seen_online
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Time since the peer was last confirmed, or since creation if never
    pub fn since_last_check(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen_online.unwrap_or(self.created))
    }

    /// How long the peer has been known
    pub fn online_time(&self) -> Duration {
        self.created.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::number::Number160;

    #[test]
    fn test_new_statistic() {
        let stat = PeerStatistic::new(PeerAddress::from_id(Number160::from(1u32)));
        assert_eq!(stat.successes(), 0);
        assert_eq!(stat.failures(), 0);
        assert!(stat.last_seen_online().is_none());
    }

    #[test]
    fn test_success_resets_failures() {
        let mut stat = PeerStatistic::new(PeerAddress::from_id(Number160::from(1u32)));
        assert_eq!(stat.failed(), 1);
        assert_eq!(stat.failed(), 2);
        stat.successfully_checked();
        assert_eq!(stat.failures(), 0);
        assert_eq!(stat.successes(), 1);
        assert!(stat.last_seen_online().is_some());
    }

    #[test]
    fn test_set_peer_address() {
        let id = Number160::from(1u32);
        let mut stat = PeerStatistic::new(PeerAddress::from_id(id));
        let updated = PeerAddress::from_id(id).change_ports(10, 11);
        let old = stat.set_peer_address(updated);
        assert_eq!(old.socket().tcp_port, 0);
        assert_eq!(stat.peer_address().socket().tcp_port, 10);
    }

    #[test]
    fn test_since_last_check() {
        let stat = PeerStatistic::new(PeerAddress::from_id(Number160::from(1u32)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(stat.since_last_check(Instant::now()) >= Duration::from_millis(10));
    }
}
