//! Material description consumed by the dense-environment extension

use crate::physics::math::{Scalar, Vector};
use serde::{Deserialize, Serialize};

/// Homogeneous material with a continuous energy loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Mean energy loss per unit path length, GeV/mm
    pub stopping_power: Scalar,
}

impl Material {
    pub fn new(stopping_power: Scalar) -> Self {
        Self { stopping_power }
    }
}

/// Lookup of the material at a position
pub trait MaterialMap: Send + Sync {
    fn material(&self, position: &Vector) -> Option<Material>;
}

/// Vacuum everywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMaterial;

impl MaterialMap for NoMaterial {
    fn material(&self, _position: &Vector) -> Option<Material> {
        None
    }
}

/// Axis-aligned box filled with a single material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialBox {
    pub min: Vector,
    pub max: Vector,
    pub material: Material,
}

impl MaterialBox {
    pub fn new(min: Vector, max: Vector, material: Material) -> Self {
        Self { min, max, material }
    }

    pub fn contains(&self, position: &Vector) -> bool {
        (0..3).all(|i| position[i] >= self.min[i] && position[i] <= self.max[i])
    }
}

impl MaterialMap for MaterialBox {
    fn material(&self, position: &Vector) -> Option<Material> {
        self.contains(position).then_some(self.material)
    }
}
