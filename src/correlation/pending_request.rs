use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;

use super::correlation_id::CorrelationId;

/// Network address of a peer, kept as an opaque comparable blob.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress(Bytes);

impl PeerAddress {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for PeerAddress {
    fn from(raw: Vec<u8>) -> Self {
        Self(Bytes::from(raw))
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::from(addr.to_string())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self)
    }
}

/// A request that has been sent and is awaiting a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub correlation_id: CorrelationId,
    pub recipient: PeerAddress,
    /// Encoded request envelope, owned by the caller's protocol layer
    pub content: Bytes,
    pub sent_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Track a new request under a freshly generated correlation id.
    pub fn new(recipient: impl Into<PeerAddress>, content: impl Into<Bytes>) -> Self {
        Self::with_correlation_id(CorrelationId::generate(), recipient, content)
    }

    /// Track a request whose envelope already carries a correlation id.
    pub fn with_correlation_id(
        correlation_id: CorrelationId,
        recipient: impl Into<PeerAddress>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            correlation_id,
            recipient: recipient.into(),
            content: content.into(),
            sent_at: Utc::now(),
        }
    }
}
