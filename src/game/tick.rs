//! Simulation Tick
//!
//! One cooperative step of the session layer, run on the single
//! simulation thread: drain the session's event queue, bind spawns and
//! despawns, sample local intent, apply this tick's move requests on the
//! authority, and replicate the resulting transforms.

use crate::game::entity::EntityId;
use crate::game::input::IntentFrame;
use crate::game::movement;
use crate::game::spawn::SpawnBinder;
use crate::network::protocol::ServerMessage;
use crate::network::session::{SessionEvent, SessionManager};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Session events processed this tick.
    pub events: Vec<SessionEvent>,
    /// Entities the authority moved this tick.
    pub moved: Vec<EntityId>,
}

/// Run one simulation tick.
///
/// # Arguments
///
/// * `session` - the session manager (event pump, roster, transport)
/// * `binder` - the entity registry this process owns
/// * `intent` - the raw input frame sampled by the embedding application
/// * `dt` - step duration in seconds
///
/// Ordering matters: events are bound before movement so an entity
/// spawned this tick can be moved by a request arriving the next tick,
/// and replication always carries post-application state.
pub fn tick(
    session: &mut SessionManager,
    binder: &mut SpawnBinder,
    intent: &IntentFrame,
    dt: f32,
) -> TickResult {
    let events = session.pump();

    let mut requests = Vec::new();
    for event in &events {
        binder.apply_event(event, session);
        if let SessionEvent::MoveRequested { request, .. } = event {
            requests.push(*request);
        }
    }

    // Owning side: sample intent for the locally owned entity.
    if let Some(local) = session.local_participant() {
        if let Some(entity) = binder.entity_owned_by(local) {
            if let Some(request) = entity.channel.sample_step(intent, dt) {
                session.send_move(request);
            }
        }
    }

    // Authority side: apply this tick's requests and replicate state.
    let moved = if session.role().is_authority() {
        let moved = movement::apply_requests(binder, &requests);
        for update in binder.state_updates(&moved) {
            session.broadcast(&ServerMessage::EntityState(update));
        }
        moved
    } else {
        Vec::new()
    };

    TickResult { events, moved }
}
