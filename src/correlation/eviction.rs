use std::fmt;

use super::correlation_id::CorrelationId;
use super::pending_request::{PeerAddress, PendingRequest};

/// Why a pending request left the cache without being matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// No response arrived before the time-to-live elapsed
    Expired,
    /// The owner dropped the request, e.g. on connection teardown
    ExplicitlyRemoved,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Expired => write!(f, "expired"),
            EvictionReason::ExplicitlyRemoved => write!(f, "explicitly_removed"),
        }
    }
}

/// Notification that a pending request was evicted.
///
/// Produced exactly once per eviction and shared read-only between all
/// subscribers of a correlation manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionEvent {
    evicted_record: PendingRequest,
    reason: EvictionReason,
    peer: PeerAddress,
}

impl EvictionEvent {
    pub fn new(evicted_record: PendingRequest, reason: EvictionReason) -> Self {
        let peer = evicted_record.recipient.clone();
        Self {
            evicted_record,
            reason,
            peer,
        }
    }

    pub fn evicted_record(&self) -> &PendingRequest {
        &self.evicted_record
    }

    pub fn reason(&self) -> EvictionReason {
        self.reason
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.evicted_record.correlation_id
    }
}
