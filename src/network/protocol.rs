//! Protocol Messages
//!
//! Wire format for the session layer. Tagged enums are serialized as JSON
//! for debugging ease; the flat `MoveRequest` also has a binary (bincode)
//! form for when compactness matters. Tagged enums are not bincode-safe,
//! so the binary helpers exist only on the flat struct.

use serde::{Deserialize, Serialize};

use crate::core::vec::Vec3;
use crate::game::entity::{ColorHint, EntityId, Transform};
use crate::network::session::ParticipantId;

// =============================================================================
// MOVE REQUEST
// =============================================================================

/// Request from an entity's owner to move it by a relative delta.
///
/// Fire-and-forget: never persisted, consumed exactly once by the
/// authority. Deltas are additive, so reordered delivery is tolerated;
/// duplicated delivery is a double-move (accepted risk).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Entity to move.
    pub entity: EntityId,
    /// Relative position delta.
    pub delta: Vec3,
}

impl MoveRequest {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// CLIENT -> AUTHORITY MESSAGES
// =============================================================================

/// Messages sent from a client participant to the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Introduce this client after the socket opens.
    Hello {
        /// Client build version, logged by the authority.
        version: String,
    },

    /// Move the named entity by a relative delta.
    Move(MoveRequest),

    /// Clean leave; the socket close is authoritative either way.
    Goodbye,
}

// =============================================================================
// AUTHORITY -> CLIENT MESSAGES
// =============================================================================

/// Description of a spawned entity, replicated to all participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawnInfo {
    /// Entity identifier.
    pub entity: EntityId,
    /// Owning participant.
    pub owner: ParticipantId,
    /// Template the entity was spawned from.
    pub template: String,
    /// Spawn transform.
    pub transform: Transform,
    /// Ownership-derived presentation hint.
    pub color: ColorHint,
}

/// Replicated transform state for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityStateUpdate {
    /// Entity identifier.
    pub entity: EntityId,
    /// Authoritative position.
    pub position: Vec3,
}

/// Messages sent from the authority to client participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection is accepted.
    Welcome {
        /// The participant id assigned to the receiver.
        participant: ParticipantId,
        /// Session instance identifier.
        session: String,
    },

    /// An entity exists; mirror it.
    EntitySpawned(EntitySpawnInfo),

    /// An entity was destroyed.
    EntityDespawned {
        /// Entity identifier.
        entity: EntityId,
    },

    /// Authoritative transform state after movement.
    EntityState(EntityStateUpdate),

    /// The authority is shutting the session down.
    Shutdown {
        /// Operator-facing reason.
        reason: String,
    },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
