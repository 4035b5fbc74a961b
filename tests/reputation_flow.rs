//! Outcomes flowing from independent RPC and P2P managers into one
//! reputation table.

use bytes::Bytes;
use peer_correlation::config::{CorrelationConfig, ReputationConfig};
use peer_correlation::correlation::{CorrelationManager, PeerAddress, PendingRequest};
use peer_correlation::reputation::ReputationManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(ttl_ms: u64) -> CorrelationConfig {
    CorrelationConfig {
        default_ttl_ms: ttl_ms,
        event_buffer: 64,
    }
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_requests_lower_reputation() {
    let rpc = CorrelationManager::new("rpc", &config(100));
    let p2p = CorrelationManager::new("p2p", &config(50));
    let reputation = Arc::new(ReputationManager::new(ReputationConfig::default()));
    let shutdown = CancellationToken::new();

    let listeners = [
        reputation.spawn_change_listener(rpc.reputation_changes(), shutdown.clone()),
        reputation.spawn_change_listener(p2p.reputation_changes(), shutdown.clone()),
    ];

    let silent = PeerAddress::from("silent");
    let chatty = PeerAddress::from("chatty");
    let spoofer = PeerAddress::from("spoofer");

    rpc.add_pending_request(PendingRequest::new(silent.clone(), Bytes::new()));
    p2p.add_pending_request(PendingRequest::new(silent.clone(), Bytes::new()));

    let answered = PendingRequest::new(chatty.clone(), Bytes::new());
    let answered_id = answered.correlation_id;
    p2p.add_pending_request(answered);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(p2p.try_match_response_from(&chatty, answered_id));
    assert!(!rpc.try_match_response_from(&spoofer, answered_id));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(reputation.reputation(&silent), -20);
    assert_eq!(reputation.reputation(&chatty), 10);
    assert_eq!(reputation.reputation(&spoofer), -5);
    assert_eq!(reputation.snapshot()[0].0, chatty);

    shutdown.cancel();
    for listener in listeners {
        listener.await.unwrap();
    }
}

#[tokio::test]
async fn test_teardown_does_not_penalize() {
    let p2p = CorrelationManager::new("p2p", &config(10_000));
    let reputation = Arc::new(ReputationManager::default());
    let shutdown = CancellationToken::new();
    let listener = reputation.spawn_listener(p2p.eviction_events(), shutdown.clone());

    let peer = PeerAddress::from("leaving");
    p2p.add_pending_request(PendingRequest::new(peer.clone(), Bytes::new()));
    assert_eq!(p2p.evict_peer(&peer), 1);

    // Dropping the manager closes the stream and ends the listener
    drop(p2p);
    listener.await.unwrap();

    assert_eq!(reputation.reputation(&peer), 0);
}
