//! Peer reputation driven by request outcomes.
//!
//! Fed either by the reputation-change streams of one or more correlation
//! managers, which carry every outcome (answered, expired, uncorrelatable),
//! or by their eviction streams, which only carry expiries. Subscribe a
//! manager through one of the two, not both, or expiries count twice.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ReputationConfig;
use crate::correlation::{EvictionEvent, EvictionReason, PeerAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationEvent {
    /// A pending request was answered in time
    ResponseReceived,
    /// A pending request expired unanswered
    NoResponseReceived,
    /// A response arrived that matched no pending request
    UnCorrelatableMessage,
}

/// An outcome attributed to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReputationChange {
    pub peer: PeerAddress,
    pub event: ReputationEvent,
}

pub struct ReputationManager {
    scores: DashMap<PeerAddress, i64>,
    config: ReputationConfig,
}

impl ReputationManager {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            scores: DashMap::new(),
            config,
        }
    }

    pub fn amount(&self, event: ReputationEvent) -> i64 {
        match event {
            ReputationEvent::ResponseReceived => self.config.response_reward,
            ReputationEvent::NoResponseReceived => self.config.no_response_penalty,
            ReputationEvent::UnCorrelatableMessage => self.config.uncorrelatable_penalty,
        }
    }

    /// Apply `event` to `peer` and return the new score
    pub fn apply(&self, peer: &PeerAddress, event: ReputationEvent) -> i64 {
        let amount = self.amount(event);
        let mut score = self
            .scores
            .entry(peer.clone())
            .or_insert(self.config.initial_reputation);
        *score = score.saturating_add(amount);

        debug!(%peer, ?event, amount, score = *score, "📊 Peer reputation updated");
        *score
    }

    /// Only expiries count against a peer; explicit removals are our own doing
    pub fn on_eviction(&self, event: &EvictionEvent) -> Option<i64> {
        match event.reason() {
            EvictionReason::Expired => {
                Some(self.apply(event.peer(), ReputationEvent::NoResponseReceived))
            }
            EvictionReason::ExplicitlyRemoved => None,
        }
    }

    pub fn on_change(&self, change: &PeerReputationChange) -> i64 {
        self.apply(&change.peer, change.event)
    }

    pub fn reputation(&self, peer: &PeerAddress) -> i64 {
        self.scores
            .get(peer)
            .map(|score| *score)
            .unwrap_or(self.config.initial_reputation)
    }

    /// All known peers, best first
    pub fn snapshot(&self) -> Vec<(PeerAddress, i64)> {
        let mut scores: Vec<(PeerAddress, i64)> = self
            .scores
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        scores.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores
    }

    pub fn clear_peer(&self, peer: &PeerAddress) {
        self.scores.remove(peer);
    }

    /// Consume an eviction stream until it ends or `shutdown` fires.
    ///
    /// Call once per correlation manager to merge several channels into one
    /// reputation table.
    pub fn spawn_listener<S>(self: &Arc<Self>, events: S, shutdown: CancellationToken) -> JoinHandle<()>
    where
        S: Stream<Item = EvictionEvent> + Send + Unpin + 'static,
    {
        self.spawn_consumer(events, shutdown, |manager, event| {
            manager.on_eviction(&event);
        })
    }

    /// Consume a reputation-change stream until it ends or `shutdown` fires
    pub fn spawn_change_listener<S>(
        self: &Arc<Self>,
        changes: S,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        S: Stream<Item = PeerReputationChange> + Send + Unpin + 'static,
    {
        self.spawn_consumer(changes, shutdown, |manager, change| {
            manager.on_change(&change);
        })
    }

    fn spawn_consumer<S, T, F>(
        self: &Arc<Self>,
        stream: S,
        shutdown: CancellationToken,
        handle: F,
    ) -> JoinHandle<()>
    where
        S: Stream<Item = T> + Send + Unpin + 'static,
        T: Send + 'static,
        F: Fn(&ReputationManager, T) + Send + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    item = stream.next() => match item {
                        Some(item) => handle(manager.as_ref(), item),
                        None => break,
                    },
                }
            }
            info!("Reputation listener stopped");
        })
    }
}

impl Default for ReputationManager {
    fn default() -> Self {
        Self::new(ReputationConfig::default())
    }
}
