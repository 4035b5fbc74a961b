pub mod correlation_id;
pub mod eviction;
pub mod expiring_cache;
pub mod manager;
pub mod pending_request;

pub use correlation_id::{CorrelationId, CORRELATION_ID_LEN};
pub use eviction::{EvictionEvent, EvictionReason};
pub use expiring_cache::ExpiringCache;
pub use manager::{CorrelationManager, CorrelationStatsSnapshot};
pub use pending_request::{PeerAddress, PendingRequest};
