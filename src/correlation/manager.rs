//! Request/response correlation for one protocol channel.
//!
//! The outbound pipeline registers every request before it is sent; the
//! inbound pipeline hands over the correlation id of every response. A
//! request ends in exactly one of two terminal states:
//!
//! - **Matched**: a response consumed it. No eviction is published.
//! - **Evicted**: it expired or was removed. One [`EvictionEvent`] is
//!   broadcast to every subscriber.
//!
//! Match and eviction race on the same cache entry; whichever removes it
//! first wins, so a request can never be both.
//!
//! Outcomes that say something about a peer are also published as
//! [`PeerReputationChange`]s: a match credits the recipient, an expiry
//! debits it, and a response from a known sender that matches nothing
//! debits the sender.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use super::correlation_id::CorrelationId;
use super::eviction::{EvictionEvent, EvictionReason};
use super::expiring_cache::ExpiringCache;
use super::pending_request::{PeerAddress, PendingRequest};
use crate::config::CorrelationConfig;
use crate::error::CorrelationError;
use crate::reputation::{PeerReputationChange, ReputationEvent};

#[derive(Debug, Default)]
struct CorrelationStats {
    added: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
    expired: AtomicU64,
    removed: AtomicU64,
}

/// Point-in-time counters for one correlation manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationStatsSnapshot {
    pub added: u64,
    pub matched: u64,
    /// Responses with no pending request (late or spurious)
    pub unmatched: u64,
    pub expired: u64,
    pub removed: u64,
}

pub struct CorrelationManager {
    channel: String,
    cache: ExpiringCache<PendingRequest>,
    events: broadcast::Sender<EvictionEvent>,
    reputation: broadcast::Sender<PeerReputationChange>,
    stats: Arc<CorrelationStats>,
}

/// Receiver as a stream that skips, and warns about, events it fell too far
/// behind to see
fn skip_lagged<T>(
    rx: broadcast::Receiver<T>,
    channel: String,
    kind: &'static str,
) -> impl Stream<Item = T> + Send + Unpin + 'static
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(
                channel = %channel,
                kind,
                skipped,
                "⚠️ Subscriber lagging, events skipped"
            );
            None
        }
    })
}

impl CorrelationManager {
    /// Create a manager with its own cache for `channel` (e.g. "rpc", "p2p")
    pub fn new(channel: impl Into<String>, config: &CorrelationConfig) -> Self {
        Self::with_cache(
            channel,
            ExpiringCache::new(config.default_ttl()),
            config.event_buffer,
        )
    }

    /// Create a manager around an existing cache. The manager takes over the
    /// cache's eviction callback.
    pub fn with_cache(
        channel: impl Into<String>,
        cache: ExpiringCache<PendingRequest>,
        event_buffer: usize,
    ) -> Self {
        let channel = channel.into();
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let (reputation, _) = broadcast::channel(event_buffer.max(1));
        let stats = Arc::new(CorrelationStats::default());

        let publisher = events.clone();
        let reputation_publisher = reputation.clone();
        let counters = stats.clone();
        let label = channel.clone();
        cache.on_evict(move |id, record, reason| {
            match reason {
                EvictionReason::Expired => counters.expired.fetch_add(1, Ordering::Relaxed),
                EvictionReason::ExplicitlyRemoved => {
                    counters.removed.fetch_add(1, Ordering::Relaxed)
                }
            };

            debug!(
                channel = %label,
                correlation_id = %id,
                peer = %record.recipient,
                %reason,
                "🗑️ Pending request evicted"
            );

            if reason == EvictionReason::Expired {
                let _ = reputation_publisher.send(PeerReputationChange {
                    peer: record.recipient.clone(),
                    event: ReputationEvent::NoResponseReceived,
                });
            }

            if publisher.send(EvictionEvent::new(record, reason)).is_err() {
                trace!(channel = %label, correlation_id = %id, "No eviction subscribers");
            }
        });

        Self {
            channel,
            cache,
            events,
            reputation,
            stats,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn default_ttl(&self) -> Duration {
        self.cache.default_ttl()
    }

    /// Start tracking a request that is about to be sent
    pub fn add_pending_request(&self, record: PendingRequest) {
        trace!(
            channel = %self.channel,
            correlation_id = %record.correlation_id,
            peer = %record.recipient,
            "📤 Tracking pending request"
        );
        self.stats.added.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(record.correlation_id, record, None);
    }

    /// Match a response to its pending request, consuming the request.
    ///
    /// Returns false for late or spurious responses.
    pub fn try_match_response(&self, response_correlation_id: CorrelationId) -> bool {
        self.match_response(response_correlation_id, None)
    }

    /// Like [`try_match_response`](Self::try_match_response), but a response
    /// that matches nothing is held against `sender`.
    pub fn try_match_response_from(
        &self,
        sender: &PeerAddress,
        response_correlation_id: CorrelationId,
    ) -> bool {
        self.match_response(response_correlation_id, Some(sender))
    }

    fn match_response(&self, id: CorrelationId, sender: Option<&PeerAddress>) -> bool {
        match self.cache.take(id) {
            Some(record) => {
                self.stats.matched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    channel = %self.channel,
                    correlation_id = %id,
                    peer = %record.recipient,
                    "✅ Response matched pending request"
                );
                self.publish_reputation(record.recipient, ReputationEvent::ResponseReceived);
                true
            }
            None => {
                self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    channel = %self.channel,
                    correlation_id = %id,
                    sender = ?sender.map(|peer| peer.to_string()),
                    "❓ Response has no pending request (late or spurious)"
                );
                if let Some(sender) = sender {
                    self.publish_reputation(
                        sender.clone(),
                        ReputationEvent::UnCorrelatableMessage,
                    );
                }
                false
            }
        }
    }

    fn publish_reputation(&self, peer: PeerAddress, event: ReputationEvent) {
        if self
            .reputation
            .send(PeerReputationChange { peer, event })
            .is_err()
        {
            trace!(channel = %self.channel, ?event, "No reputation subscribers");
        }
    }

    /// Match a response using the raw correlation id from its envelope
    pub fn try_match_response_bytes(&self, raw_id: &[u8]) -> Result<bool, CorrelationError> {
        let id = CorrelationId::from_bytes(raw_id).map_err(|e| {
            warn!(channel = %self.channel, "🚫 Rejecting response: {}", e);
            e
        })?;
        Ok(self.try_match_response(id))
    }

    /// Stop tracking a request without a response, e.g. on disconnect
    pub fn remove(&self, correlation_id: CorrelationId) -> Option<PendingRequest> {
        self.cache.remove(correlation_id)
    }

    /// Drop every pending request addressed to `peer`
    pub fn evict_peer(&self, peer: &PeerAddress) -> usize {
        let count = self.cache.remove_where(|record| &record.recipient == peer);
        if count > 0 {
            debug!(
                channel = %self.channel,
                %peer,
                count,
                "🧹 Evicted pending requests for peer"
            );
        }
        count
    }

    pub fn pending_request(&self, correlation_id: CorrelationId) -> Option<PendingRequest> {
        self.cache.try_get(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.cache.len()
    }

    /// Evict every request past its deadline now. Returns how many expired.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Raw receiver for future eviction events
    pub fn subscribe(&self) -> broadcast::Receiver<EvictionEvent> {
        self.events.subscribe()
    }

    /// Stream of future eviction events.
    ///
    /// A subscriber that falls more than `event_buffer` events behind skips
    /// the missed ones; the producer never waits on it.
    pub fn eviction_events(&self) -> impl Stream<Item = EvictionEvent> + Send + Unpin + 'static {
        skip_lagged(self.events.subscribe(), self.channel.clone(), "eviction")
    }

    /// Raw receiver for future peer reputation changes
    pub fn subscribe_reputation(&self) -> broadcast::Receiver<PeerReputationChange> {
        self.reputation.subscribe()
    }

    /// Stream of future peer reputation changes, with the same lag handling
    /// as [`eviction_events`](Self::eviction_events)
    pub fn reputation_changes(
        &self,
    ) -> impl Stream<Item = PeerReputationChange> + Send + Unpin + 'static {
        skip_lagged(self.reputation.subscribe(), self.channel.clone(), "reputation")
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn stats(&self) -> CorrelationStatsSnapshot {
        CorrelationStatsSnapshot {
            added: self.stats.added.load(Ordering::Relaxed),
            matched: self.stats.matched.load(Ordering::Relaxed),
            unmatched: self.stats.unmatched.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            removed: self.stats.removed.load(Ordering::Relaxed),
        }
    }
}
