//! Entity Spawn & Ownership Binder
//!
//! Binds participants to entities: one entity per participant, spawned by
//! the authority on the connection event and torn down on disconnect.
//! Existence and ownership are replicated to every current and future
//! participant; non-authority processes mirror the replicated entities.
//!
//! The spawn/destroy path is defensive: connection event delivery is
//! external, so duplicates and unknowns are logged no-ops, never failures.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::game::entity::{owner_role_label, Entity, EntityId, EntityTemplate};
use crate::network::protocol::{EntitySpawnInfo, EntityStateUpdate, ServerMessage};
use crate::network::session::{ParticipantId, SessionEvent, SessionManager};

/// Replication collaborator used to announce entity existence and state.
///
/// The session manager implements this over its transport; tests substitute
/// a recording stub. Delivery is best-effort and never required for
/// authority-side correctness.
pub trait Replicator {
    /// Send to every connected participant.
    fn broadcast(&self, message: &ServerMessage);
    /// Send to a single participant.
    fn send_to(&self, peer: ParticipantId, message: &ServerMessage);
}

/// Owner-keyed entity registry and spawn/despawn logic.
#[derive(Debug)]
pub struct SpawnBinder {
    entities: BTreeMap<EntityId, Entity>,
    by_owner: BTreeMap<ParticipantId, EntityId>,
    next_entity: u64,
}

impl SpawnBinder {
    /// Create an empty binder.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            by_owner: BTreeMap::new(),
            next_entity: 1,
        }
    }

    /// Authority-side reaction to a participant connecting.
    ///
    /// Catches the new participant up on existing entities, then spawns
    /// exactly one entity owned by them and broadcasts its existence. A
    /// duplicate connection event for an already-bound participant is a
    /// logged no-op, as is a join while no template is resolved.
    pub fn participant_joined(
        &mut self,
        owner: ParticipantId,
        template: Option<&EntityTemplate>,
        local: Option<ParticipantId>,
        replicator: &impl Replicator,
    ) -> Option<EntityId> {
        if self.by_owner.contains_key(&owner) {
            warn!(%owner, "duplicate connection event; entity already bound");
            return None;
        }

        let Some(template) = template else {
            warn!(%owner, "no entity template resolved; participant joins without an entity");
            return None;
        };

        // Late joiners need the entities that already exist.
        for entity in self.entities.values() {
            replicator.send_to(owner, &ServerMessage::EntitySpawned(entity.spawn_info()));
        }

        let id = EntityId::new(self.next_entity);
        self.next_entity += 1;

        let entity = Entity::spawned(id, owner, template, local);
        info!(
            entity = %id,
            %owner,
            role = owner_role_label(owner),
            "spawned participant entity"
        );

        replicator.broadcast(&ServerMessage::EntitySpawned(entity.spawn_info()));
        self.by_owner.insert(owner, id);
        self.entities.insert(id, entity);
        Some(id)
    }

    /// Authority-side reaction to a participant disconnecting: destroy
    /// their entity and replicate the despawn. Unknown owners are a logged
    /// no-op.
    pub fn participant_left(&mut self, owner: ParticipantId, replicator: &impl Replicator) -> bool {
        let Some(id) = self.by_owner.remove(&owner) else {
            warn!(%owner, "disconnect for participant with no bound entity");
            return false;
        };

        self.entities.remove(&id);
        info!(entity = %id, %owner, "destroyed participant entity");
        replicator.broadcast(&ServerMessage::EntityDespawned { entity: id });
        true
    }

    /// Non-authority mirror of a replicated spawn.
    pub fn mirror_spawn(&mut self, info: &EntitySpawnInfo, local: Option<ParticipantId>) {
        if self.entities.contains_key(&info.entity) {
            debug!(entity = %info.entity, "mirror for already-known entity ignored");
            return;
        }

        info!(
            entity = %info.entity,
            owner = %info.owner,
            role = owner_role_label(info.owner),
            "mirrored replicated entity"
        );
        self.by_owner.insert(info.owner, info.entity);
        self.entities.insert(info.entity, Entity::mirrored(info, local));
    }

    /// Non-authority mirror of a replicated despawn.
    pub fn mirror_despawn(&mut self, entity: EntityId) {
        match self.entities.remove(&entity) {
            Some(removed) => {
                self.by_owner.remove(&removed.owner);
            }
            None => debug!(%entity, "despawn for unknown mirrored entity ignored"),
        }
    }

    /// Non-authority mirror of replicated transform state.
    pub fn mirror_transform(&mut self, update: &EntityStateUpdate) {
        match self.entities.get_mut(&update.entity) {
            Some(entity) if !entity.authority_instance => {
                entity.transform.position = update.position;
            }
            Some(_) => {
                debug!(entity = %update.entity, "transform echo for authority instance ignored")
            }
            None => debug!(entity = %update.entity, "transform for unknown entity ignored"),
        }
    }

    /// Route a session event to the matching binder operation.
    pub fn apply_event(&mut self, event: &SessionEvent, session: &SessionManager) {
        match event {
            SessionEvent::ParticipantConnected(id) => {
                self.participant_joined(
                    *id,
                    session.spawn_template(),
                    session.local_participant(),
                    session,
                );
            }
            SessionEvent::ParticipantDisconnected(id) => {
                self.participant_left(*id, session);
            }
            SessionEvent::EntityReplicated(info) => {
                self.mirror_spawn(info, session.local_participant());
            }
            SessionEvent::EntityDespawnReplicated(entity) => self.mirror_despawn(*entity),
            SessionEvent::TransformReplicated(update) => self.mirror_transform(update),
            SessionEvent::Welcomed { .. }
            | SessionEvent::MoveRequested { .. }
            | SessionEvent::ConnectionLost => {}
        }
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Look up an entity mutably.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// The entity owned by a participant, if bound.
    pub fn entity_owned_by(&self, owner: ParticipantId) -> Option<&Entity> {
        self.by_owner.get(&owner).and_then(|id| self.entities.get(id))
    }

    /// Iterate all entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entities are live.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Wire state updates for the given entities, for replication after
    /// authority-side movement.
    pub fn state_updates(&self, moved: &[EntityId]) -> Vec<EntityStateUpdate> {
        moved
            .iter()
            .filter_map(|id| self.entities.get(id))
            .map(|entity| EntityStateUpdate {
                entity: entity.id,
                position: entity.transform.position,
            })
            .collect()
    }

    /// Drop all entities. Called when the session shuts down.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_owner.clear();
    }
}

impl Default for SpawnBinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec::Vec3;
    use crate::game::entity::ColorHint;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingReplicator {
        broadcasts: RefCell<Vec<ServerMessage>>,
        directed: RefCell<Vec<(ParticipantId, ServerMessage)>>,
    }

    impl Replicator for RecordingReplicator {
        fn broadcast(&self, message: &ServerMessage) {
            self.broadcasts.borrow_mut().push(message.clone());
        }

        fn send_to(&self, peer: ParticipantId, message: &ServerMessage) {
            self.directed.borrow_mut().push((peer, message.clone()));
        }
    }

    fn template() -> EntityTemplate {
        EntityTemplate::default()
    }

    #[test]
    fn test_exactly_one_entity_per_participant() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();
        let owner = ParticipantId::new(7);

        let first = binder.participant_joined(owner, Some(&template()), None, &replicator);
        assert!(first.is_some());
        assert_eq!(binder.len(), 1);

        // Duplicate connection event is a no-op.
        let second = binder.participant_joined(owner, Some(&template()), None, &replicator);
        assert!(second.is_none());
        assert_eq!(binder.len(), 1);
        assert_eq!(binder.entity_owned_by(owner).unwrap().owner, owner);
    }

    #[test]
    fn test_color_hints_follow_authority_ownership() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();

        binder.participant_joined(
            ParticipantId::AUTHORITY,
            Some(&template()),
            Some(ParticipantId::AUTHORITY),
            &replicator,
        );
        binder.participant_joined(
            ParticipantId::new(7),
            Some(&template()),
            Some(ParticipantId::AUTHORITY),
            &replicator,
        );

        let host = binder.entity_owned_by(ParticipantId::AUTHORITY).unwrap();
        let guest = binder.entity_owned_by(ParticipantId::new(7)).unwrap();
        assert_eq!(host.color, ColorHint::AUTHORITY);
        assert_eq!(guest.color, ColorHint::NON_AUTHORITY);
    }

    #[test]
    fn test_disconnect_destroys_entity() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();
        let owner = ParticipantId::new(3);

        binder.participant_joined(owner, Some(&template()), None, &replicator);
        assert!(binder.participant_left(owner, &replicator));
        assert!(binder.is_empty());
        assert!(binder.entity_owned_by(owner).is_none());

        // Unknown disconnect is a no-op, not an error.
        assert!(!binder.participant_left(owner, &replicator));
    }

    #[test]
    fn test_join_without_template_spawns_nothing() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();

        let spawned = binder.participant_joined(ParticipantId::new(1), None, None, &replicator);
        assert!(spawned.is_none());
        assert!(binder.is_empty());
        assert!(replicator.broadcasts.borrow().is_empty());
    }

    #[test]
    fn test_late_joiner_receives_existing_entities() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();
        let first = ParticipantId::new(1);
        let second = ParticipantId::new(2);

        binder.participant_joined(first, Some(&template()), None, &replicator);
        binder.participant_joined(second, Some(&template()), None, &replicator);

        // The second participant was caught up on the first's entity.
        let directed = replicator.directed.borrow();
        assert_eq!(directed.len(), 1);
        assert_eq!(directed[0].0, second);
        match &directed[0].1 {
            ServerMessage::EntitySpawned(info) => assert_eq!(info.owner, first),
            other => panic!("expected EntitySpawned, got {other:?}"),
        }

        // Both spawns were broadcast to everyone.
        assert_eq!(replicator.broadcasts.borrow().len(), 2);
    }

    #[test]
    fn test_mirror_spawn_and_transform() {
        let mut authority = SpawnBinder::new();
        let replicator = RecordingReplicator::default();
        let owner = ParticipantId::new(5);

        let id = authority
            .participant_joined(owner, Some(&template()), None, &replicator)
            .unwrap();
        let info = authority.entity(id).unwrap().spawn_info();

        let mut mirror = SpawnBinder::new();
        mirror.mirror_spawn(&info, Some(owner));
        // Duplicate mirror is ignored.
        mirror.mirror_spawn(&info, Some(owner));
        assert_eq!(mirror.len(), 1);

        let mirrored = mirror.entity(id).unwrap();
        assert!(!mirrored.authority_instance);
        assert_eq!(mirrored.owner, owner);

        mirror.mirror_transform(&EntityStateUpdate {
            entity: id,
            position: Vec3::new(0.0, 0.0, 0.3),
        });
        assert!(mirror
            .entity(id)
            .unwrap()
            .transform
            .position
            .approx_eq(Vec3::new(0.0, 0.0, 0.3)));

        mirror.mirror_despawn(id);
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_state_updates_cover_moved_entities() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();
        let id = binder
            .participant_joined(ParticipantId::new(1), Some(&template()), None, &replicator)
            .unwrap();

        binder.entity_mut(id).unwrap().transform.position = Vec3::new(1.0, 0.0, 2.0);

        let updates = binder.state_updates(&[id, EntityId::new(99)]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].entity, id);
        assert!(updates[0].position.approx_eq(Vec3::new(1.0, 0.0, 2.0)));
    }

    #[test]
    fn test_clear_empties_registry() {
        let mut binder = SpawnBinder::new();
        let replicator = RecordingReplicator::default();
        binder.participant_joined(ParticipantId::new(1), Some(&template()), None, &replicator);
        binder.participant_joined(ParticipantId::new(2), Some(&template()), None, &replicator);

        binder.clear();
        assert!(binder.is_empty());
        assert!(binder.entity_owned_by(ParticipantId::new(1)).is_none());
    }
}
