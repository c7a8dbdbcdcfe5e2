//! Wire encoding of placements and placement responses.
//!
//! Everything travels as bincode. Collections are numeric codes, ids are raw
//! integers, and a rejection carries the failure's numeric code alongside its
//! display text so a client can localize or fall back to the text.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::placement::{Placement, PlacementFailure, PlacementRequest};

/// Server answer to a placement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementResponse {
    /// The placement was committed.
    Accepted(Placement),
    /// The placement was refused; nothing changed.
    Rejected {
        /// [`PlacementFailure::code`].
        code: u8,
        /// [`PlacementFailure::reason`].
        reason: String,
    },
}

impl PlacementResponse {
    /// Build the response for a placement outcome.
    #[must_use]
    pub fn from_result(result: &std::result::Result<Placement, PlacementFailure>) -> Self {
        match result {
            Ok(placement) => Self::Accepted(placement.clone()),
            Err(failure) => Self::Rejected {
                code: failure.code(),
                reason: failure.reason(),
            },
        }
    }

    /// Whether the placement was committed.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| GameError::Serialization(format!("Failed to encode {what}: {e}")))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8], what: &str) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| GameError::Serialization(format!("Failed to decode {what}: {e}")))
}

/// Encode a placement for broadcast to replicas.
pub fn encode_placement(placement: &Placement) -> Result<Vec<u8>> {
    encode(placement, "placement")
}

/// Decode a broadcast placement.
pub fn decode_placement(bytes: &[u8]) -> Result<Placement> {
    decode(bytes, "placement")
}

/// Encode a client placement request.
pub fn encode_request(request: &PlacementRequest) -> Result<Vec<u8>> {
    encode(request, "placement request")
}

/// Decode a client placement request.
pub fn decode_request(bytes: &[u8]) -> Result<PlacementRequest> {
    decode(bytes, "placement request")
}

/// Encode a placement response.
pub fn encode_response(response: &PlacementResponse) -> Result<Vec<u8>> {
    encode(response, "placement response")
}

/// Decode a placement response.
pub fn decode_response(bytes: &[u8]) -> Result<PlacementResponse> {
    decode(bytes, "placement response")
}
