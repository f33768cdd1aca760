use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::scalar::{scalar_from_f32, Scalar};

/// World-space position of a simulation object, in fixed-point units.
///
/// Presence of this component is what makes an object a candidate for the
/// spatial index.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: Scalar,
    pub y: Scalar,
}

impl Position {
    pub fn new(x: Scalar, y: Scalar) -> Self {
        Self { x, y }
    }

    pub fn from_f32(x: f32, y: f32) -> Self {
        Self {
            x: scalar_from_f32(x),
            y: scalar_from_f32(y),
        }
    }

    pub fn offset(self, dx: Scalar, dy: Scalar) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}
