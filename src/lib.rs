//! Request/response correlation for peer-to-peer messaging.
//!
//! Outbound requests are tracked under a correlation id until a response
//! consumes them or they expire. Expired or removed requests are published
//! as eviction events; matches, expiries and uncorrelatable responses are
//! published as reputation changes that the reputation layer scores.

pub mod config;
pub mod correlation;
pub mod error;
pub mod logging;
pub mod reputation;

pub use correlation::{
    CorrelationId, CorrelationManager, EvictionEvent, EvictionReason, ExpiringCache,
    PeerAddress, PendingRequest,
};
pub use error::CorrelationError;
