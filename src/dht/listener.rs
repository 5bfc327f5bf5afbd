//! Peer status interfaces
//!
//! The transport layer reports every successful or failed exchange through
//! [`PeerStatusListener`]; the peer map implements it and in turn notifies
//! [`PeerMapChangeListener`]s about what changed.

use crate::dht::address::PeerAddress;
use crate::dht::statistic::PeerStatistic;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an exchange with a peer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailReason {
    /// The peer did not answer in time
    Timeout,
    /// The peer is most likely offline
    ProbablyOffline,
    /// The peer announced that it is shutting down
    Shutdown,
    /// The exchange failed with an error
    Exception,
    /// We aborted the exchange
    UserAbort,
    /// The peer aborted the exchange
    PeerAbort,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Timeout => write!(f, "timeout"),
            FailReason::ProbablyOffline => write!(f, "probably offline"),
            FailReason::Shutdown => write!(f, "shutdown"),
            FailReason::Exception => write!(f, "exception"),
            FailReason::UserAbort => write!(f, "user abort"),
            FailReason::PeerAbort => write!(f, "peer abort"),
        }
    }
}

/// Protocol the reporting exchange used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionHint {
    Tcp,
    Udp,
}

/// Receives liveness reports from any message exchange
pub trait PeerStatusListener: Send + Sync {
    /// A peer answered, or was reported by `referrer`.
    ///
    /// `referrer` is `None` if we talked to `remote` directly. Returns true
    /// if the report changed the listener's state.
    fn peer_found(&self, remote: &PeerAddress, referrer: Option<&PeerAddress>, hint: Option<ConnectionHint>) -> bool;

    /// An exchange with a peer failed. Returns true if the report changed
    /// the listener's state.
    fn peer_failed(&self, remote: &PeerAddress, reason: FailReason) -> bool;
}

/// Observes insertions, removals and updates of the peer map
pub trait PeerMapChangeListener: Send + Sync {
    fn peer_inserted(&self, peer: &PeerAddress, verified: bool);

    fn peer_removed(&self, peer: &PeerAddress, statistic: &PeerStatistic);

    fn peer_updated(&self, peer: &PeerAddress, statistic: &PeerStatistic);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_reason_display() {
        assert_eq!(FailReason::Timeout.to_string(), "timeout");
        assert_eq!(FailReason::ProbablyOffline.to_string(), "probably offline");
        assert_eq!(FailReason::PeerAbort.to_string(), "peer abort");
    }

    #[test]
    fn test_fail_reason_serde() {
        let json = serde_json::to_string(&FailReason::Shutdown).unwrap();
        let back: FailReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FailReason::Shutdown);
    }
}
