//! Intent Sampling
//!
//! Merges two input sources into a single 2D intent vector: discrete
//! directional keys and an analog axis (pointing device / stick). The axis
//! overrides the keys only when its squared magnitude is strictly larger;
//! otherwise keys win. The tie-break is exact so tests stay deterministic.
//!
//! Producing the raw key/axis state is the embedding application's job;
//! this module only resolves it.

use serde::{Deserialize, Serialize};

use crate::core::vec::Vec2;

/// Squared-magnitude deadzone below which intent is treated as idle.
pub const INTENT_DEADZONE: f32 = 1e-4;

/// Discrete directional key state.
///
/// Opposite keys cancel; each axis resolves to -1, 0 or +1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIntent {
    /// Move left (-X) held.
    pub left: bool,
    /// Move right (+X) held.
    pub right: bool,
    /// Move up (+Y) held.
    pub up: bool,
    /// Move down (-Y) held.
    pub down: bool,
}

impl KeyIntent {
    /// No keys held.
    pub const fn none() -> Self {
        Self {
            left: false,
            right: false,
            up: false,
            down: false,
        }
    }

    /// Resolve held keys to a 2D vector with -1/0/+1 components.
    pub fn vector(&self) -> Vec2 {
        let mut v = Vec2::ZERO;
        if self.left {
            v.x -= 1.0;
        }
        if self.right {
            v.x += 1.0;
        }
        if self.up {
            v.y += 1.0;
        }
        if self.down {
            v.y -= 1.0;
        }
        v
    }
}

/// One sampled frame of raw input: key state plus the analog axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentFrame {
    /// Discrete directional keys.
    pub keys: KeyIntent,
    /// Analog 2D axis (stick / pointing device), each component in [-1, 1].
    pub axis: Vec2,
}

impl IntentFrame {
    /// Neutral frame: no keys, centered axis.
    pub const fn idle() -> Self {
        Self {
            keys: KeyIntent::none(),
            axis: Vec2::ZERO,
        }
    }

    /// Frame driven purely by keys.
    pub const fn from_keys(keys: KeyIntent) -> Self {
        Self {
            keys,
            axis: Vec2::ZERO,
        }
    }

    /// Frame driven purely by the analog axis.
    pub const fn from_axis(axis: Vec2) -> Self {
        Self {
            keys: KeyIntent::none(),
            axis,
        }
    }

    /// Resolve the frame to a single intent vector.
    ///
    /// The axis wins only when its squared magnitude is strictly larger
    /// than the key vector's; on a tie the keys win.
    pub fn resolve(&self) -> Vec2 {
        let keyed = self.keys.vector();
        if self.axis.length_squared() > keyed.length_squared() {
            self.axis
        } else {
            keyed
        }
    }

    /// Whether the resolved intent clears the deadzone.
    pub fn is_active(&self) -> bool {
        self.resolve().length_squared() > INTENT_DEADZONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_resolve_to_unit_components() {
        let keys = KeyIntent {
            right: true,
            up: true,
            ..KeyIntent::none()
        };
        assert!(keys.vector().approx_eq(Vec2::new(1.0, 1.0)));
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let keys = KeyIntent {
            left: true,
            right: true,
            ..KeyIntent::none()
        };
        assert!(keys.vector().approx_eq(Vec2::ZERO));
    }

    #[test]
    fn test_keys_win_over_weaker_axis() {
        // Key intent (1, 0) has magnitude 1; axis magnitude 0.5 along (0, 1).
        let frame = IntentFrame {
            keys: KeyIntent {
                right: true,
                ..KeyIntent::none()
            },
            axis: Vec2::new(0.0, 0.5),
        };
        assert!(frame.resolve().approx_eq(Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn test_stronger_axis_wins_over_keys() {
        // Axis magnitude 2 beats key magnitude 1.
        let frame = IntentFrame {
            keys: KeyIntent {
                right: true,
                ..KeyIntent::none()
            },
            axis: Vec2::new(0.0, 2.0),
        };
        assert!(frame.resolve().approx_eq(Vec2::new(0.0, 2.0)));
    }

    #[test]
    fn test_equal_magnitude_keeps_keys() {
        // Strictly-larger rule: equal magnitudes fall through to keys.
        let frame = IntentFrame {
            keys: KeyIntent {
                right: true,
                ..KeyIntent::none()
            },
            axis: Vec2::new(0.0, 1.0),
        };
        assert!(frame.resolve().approx_eq(Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn test_idle_frame_is_inactive() {
        assert!(!IntentFrame::idle().is_active());
    }

    #[test]
    fn test_deadzone_boundary() {
        // Squared magnitude 8.1e-5 sits below the 1e-4 deadzone.
        let below = IntentFrame::from_axis(Vec2::new(0.009, 0.0));
        assert!(!below.is_active());

        // Squared magnitude 4e-4 clears it.
        let above = IntentFrame::from_axis(Vec2::new(0.02, 0.0));
        assert!(above.is_active());
    }
}
