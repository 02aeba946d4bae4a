//! # Netcube Session Layer
//!
//! A small multiplayer session layer: one process takes a network role
//! (host, dedicated server, or client) over a WebSocket transport, newly
//! joined participants are bound to spawned entities, and entity movement
//! is mutated only on the authority side, driven by move requests from the
//! owning participants.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NETCUBE SESSION LAYER                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  └── vec.rs      - 2D/3D float vector math                   │
//! │                                                              │
//! │  game/           - Simulation-side logic                     │
//! │  ├── entity.rs   - Entities, templates, ownership hints      │
//! │  ├── input.rs    - Intent sampling and merge precedence      │
//! │  ├── movement.rs - Authoritative movement channel            │
//! │  ├── spawn.rs    - Entity spawn & ownership binder           │
//! │  └── tick.rs     - Per-tick orchestration                    │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── transport.rs- WebSocket listener/connector binding      │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Roles, roster, event pump                 │
//! │                                                              │
//! │  panel.rs        - Operator control surface                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! Exactly one process per session - the host or the dedicated server -
//! may mutate entity transforms. Owners of entities sample input and send
//! relative move deltas; the authority applies them unconditionally and
//! replicates the resulting state to every participant. Deltas commute,
//! so reordered delivery is tolerated; dropped or duplicated requests are
//! accepted risks of the fire-and-forget design.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod panel;

// Re-export commonly used types
pub use crate::core::vec::{Vec2, Vec3};
pub use game::entity::{ColorHint, Entity, EntityId, EntityTemplate, Transform};
pub use game::input::{IntentFrame, KeyIntent, INTENT_DEADZONE};
pub use game::movement::{ChannelSide, MovementChannel, MOVE_SPEED};
pub use game::spawn::{Replicator, SpawnBinder};
pub use network::protocol::{ClientMessage, MoveRequest, ServerMessage};
pub use network::session::{
    ConnectionEvent, ParticipantId, Role, SessionError, SessionEvent, SessionManager,
};
pub use network::transport::{TransportConfig, TransportEvent, DEFAULT_ADDRESS, DEFAULT_PORT};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
