//! Shared primitives.
//!
//! Small float vector math used by intent sampling and entity transforms.
//! The session layer has no physics; this is deliberately minimal.

pub mod vec;
