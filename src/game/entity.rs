//! Entity Definitions
//!
//! The per-participant entity: identity, ownership tag, transform state,
//! and the ownership-derived presentation hint handed to the rendering
//! collaborator. Only the authority process ever writes a live entity's
//! transform; non-authority processes hold replicated mirrors.

use serde::{Deserialize, Serialize};

use crate::core::vec::Vec3;
use crate::game::movement::MovementChannel;
use crate::network::protocol::EntitySpawnInfo;
use crate::network::session::ParticipantId;

// =============================================================================
// ENTITY ID
// =============================================================================

/// Unique entity identifier, assigned by the authority at spawn.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TRANSFORM
// =============================================================================

/// Entity transform state: position, rotation (euler degrees), scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World position.
    pub position: Vec3,
    /// Euler rotation in degrees.
    pub rotation: Vec3,
    /// Per-axis scale.
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

// =============================================================================
// TEMPLATE
// =============================================================================

/// Name of the well-known fallback template.
pub const DEFAULT_TEMPLATE_NAME: &str = "PlayerCube";

/// Template used to spawn participant entities.
///
/// Resolved by the host process; the well-known `PlayerCube` template is
/// the fallback when the operator configures nothing else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    /// Template name, forwarded to the rendering collaborator.
    pub name: String,
    /// Spawn transform.
    pub transform: Transform,
}

impl EntityTemplate {
    /// Create a named template with an identity transform.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
        }
    }
}

impl Default for EntityTemplate {
    /// The well-known fallback template.
    fn default() -> Self {
        Self::named(DEFAULT_TEMPLATE_NAME)
    }
}

// =============================================================================
// PRESENTATION HINT
// =============================================================================

/// RGB presentation hint derived from ownership.
///
/// Purely configuration for the rendering collaborator; authority logic
/// never reads it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorHint {
    /// Red channel, 0..=1.
    pub r: f32,
    /// Green channel, 0..=1.
    pub g: f32,
    /// Blue channel, 0..=1.
    pub b: f32,
}

impl ColorHint {
    /// Hint for the entity owned by the authority participant.
    pub const AUTHORITY: Self = Self {
        r: 1.0,
        g: 0.75,
        b: 0.2,
    };

    /// Hint for every other participant's entity.
    pub const NON_AUTHORITY: Self = Self {
        r: 0.2,
        g: 0.6,
        b: 1.0,
    };

    /// Derive the hint from the owning participant.
    pub fn for_owner(owner: ParticipantId) -> Self {
        if owner.is_authority() {
            Self::AUTHORITY
        } else {
            Self::NON_AUTHORITY
        }
    }
}

/// Human-readable role label for an entity owner, used in spawn logs.
pub fn owner_role_label(owner: ParticipantId) -> &'static str {
    if owner.is_authority() {
        "Host"
    } else {
        "Client"
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// A spawned per-participant entity.
#[derive(Debug)]
pub struct Entity {
    /// Entity identifier.
    pub id: EntityId,
    /// Owning participant.
    pub owner: ParticipantId,
    /// Template name this entity was spawned from.
    pub template_name: String,
    /// Transform state. Written by the authority; mirrors only receive
    /// replicated values.
    pub transform: Transform,
    /// Ownership-derived presentation hint.
    pub color: ColorHint,
    /// Whether this instance lives on the authority process.
    pub authority_instance: bool,
    /// Role-tagged movement channel for this entity.
    pub channel: MovementChannel,
}

impl Entity {
    /// Create the authoritative instance, as spawned by the authority on a
    /// participant's connection event.
    pub fn spawned(
        id: EntityId,
        owner: ParticipantId,
        template: &EntityTemplate,
        local: Option<ParticipantId>,
    ) -> Self {
        Self {
            id,
            owner,
            template_name: template.name.clone(),
            transform: template.transform,
            color: ColorHint::for_owner(owner),
            authority_instance: true,
            channel: MovementChannel::for_entity(id, owner, local),
        }
    }

    /// Create a non-authoritative mirror from a replicated spawn.
    pub fn mirrored(info: &EntitySpawnInfo, local: Option<ParticipantId>) -> Self {
        Self {
            id: info.entity,
            owner: info.owner,
            template_name: info.template.clone(),
            transform: info.transform,
            color: info.color,
            authority_instance: false,
            channel: MovementChannel::for_entity(info.entity, info.owner, local),
        }
    }

    /// Wire description of this entity for replication.
    pub fn spawn_info(&self) -> EntitySpawnInfo {
        EntitySpawnInfo {
            entity: self.id,
            owner: self.owner,
            template: self.template_name.clone(),
            transform: self.transform,
            color: self.color,
        }
    }
}
