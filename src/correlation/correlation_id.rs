//! Correlation identifiers linking an outbound request to its response.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CorrelationError;

/// Width of a correlation id on the wire.
pub const CORRELATION_ID_LEN: usize = 16;

/// Opaque 16-byte token identifying one outstanding request.
///
/// Equality and ordering are bytewise. Ids are `Copy` so they can be used
/// freely as map keys and inside log fields.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationId([u8; CORRELATION_ID_LEN]);

impl CorrelationId {
    /// Generate a fresh id for a new outgoing request.
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Parse an id received from a message envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CorrelationError> {
        let raw: [u8; CORRELATION_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| CorrelationError::MalformedIdentifier {
                    expected: CORRELATION_ID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(raw))
    }

    pub fn to_bytes(&self) -> [u8; CORRELATION_ID_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; CORRELATION_ID_LEN] {
        &self.0
    }
}

impl From<[u8; CORRELATION_ID_LEN]> for CorrelationId {
    fn from(raw: [u8; CORRELATION_ID_LEN]) -> Self {
        Self(raw)
    }
}

impl TryFrom<&[u8]> for CorrelationId {
    type Error = CorrelationError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl FromStr for CorrelationId {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CorrelationError::MalformedIdentifier {
            expected: CORRELATION_ID_LEN,
            actual: s.len() / 2,
        })?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self)
    }
}
