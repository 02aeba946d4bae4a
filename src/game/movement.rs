//! Authoritative Movement Channel
//!
//! Per-entity movement logic split across the ownership boundary. The
//! owning side samples intent and emits `MoveRequest`s; the authority
//! applies the requested deltas to entity transforms. Which half runs is a
//! plain conditional on `owner == local participant`, fixed once per
//! process at spawn time.
//!
//! The authority applies deltas unconditionally: no speed clamp, no bounds
//! check, no rate limit. This is a trust-the-client model and a known
//! limitation, not an oversight; validation belongs to a gameplay layer
//! above this crate.

use tracing::debug;

use crate::core::vec::Vec3;
use crate::game::entity::{EntityId, Transform};
use crate::game::input::{IntentFrame, INTENT_DEADZONE};
use crate::game::spawn::SpawnBinder;
use crate::network::protocol::MoveRequest;
use crate::network::session::ParticipantId;

/// Default movement speed in units per second.
pub const MOVE_SPEED: f32 = 3.0;

/// Which half of the channel runs on this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelSide {
    /// The local participant owns the entity: sample intent, emit requests.
    Owning,
    /// Some other participant owns it: this process never samples for it.
    Remote,
}

/// Role-tagged movement channel owned by one entity.
#[derive(Clone, Copy, Debug)]
pub struct MovementChannel {
    /// Entity this channel drives.
    pub entity: EntityId,
    /// Side selected at construction from the ownership comparison.
    pub side: ChannelSide,
    /// Movement speed in units per second.
    pub speed: f32,
}

impl MovementChannel {
    /// Build the channel for an entity, selecting the side from
    /// `owner == local`.
    pub fn for_entity(entity: EntityId, owner: ParticipantId, local: Option<ParticipantId>) -> Self {
        let side = if local == Some(owner) {
            ChannelSide::Owning
        } else {
            ChannelSide::Remote
        };
        Self {
            entity,
            side,
            speed: MOVE_SPEED,
        }
    }

    /// Build an owning-side channel directly. Used by scripted drivers that
    /// stand in for a remote participant.
    pub fn owning(entity: EntityId) -> Self {
        Self {
            entity,
            side: ChannelSide::Owning,
            speed: MOVE_SPEED,
        }
    }

    /// Override the movement speed.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Owning-side step: resolve intent and produce the move request for
    /// one step of `dt` seconds.
    ///
    /// Returns `None` on the remote side, and below the deadzone. The
    /// owning side never mutates the transform itself; movement becomes
    /// visible only once the authority replicates the updated state back.
    pub fn sample_step(&self, frame: &IntentFrame, dt: f32) -> Option<MoveRequest> {
        if self.side != ChannelSide::Owning {
            return None;
        }

        let movement = Vec3::from_plane(frame.resolve());
        if movement.length_squared() <= INTENT_DEADZONE {
            return None;
        }

        Some(MoveRequest {
            entity: self.entity,
            delta: movement * self.speed * dt,
        })
    }

    /// Authority-side application: add the requested delta to the
    /// transform, unconditionally.
    pub fn apply(transform: &mut Transform, request: &MoveRequest) {
        transform.position += request.delta;
    }
}

/// Apply a tick's worth of move requests against the authoritative
/// entity registry.
///
/// Requests naming unknown entities are dropped with a debug log; a
/// dropped request is a missed movement frame, not an error. Returns the
/// ids of entities that moved, for replication.
pub fn apply_requests(binder: &mut SpawnBinder, requests: &[MoveRequest]) -> Vec<EntityId> {
    let mut moved = Vec::new();
    for request in requests {
        match binder.entity_mut(request.entity) {
            Some(entity) => {
                MovementChannel::apply(&mut entity.transform, request);
                if !moved.contains(&request.entity) {
                    moved.push(request.entity);
                }
            }
            None => {
                debug!(entity = %request.entity, "move request for unknown entity dropped");
            }
        }
    }
    moved
}
