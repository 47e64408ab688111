//! Magnetic field sources sampled by the stepper

use crate::physics::math::{Scalar, Vector};

/// A static magnetic field, in tesla
pub trait MagneticField: Send + Sync {
    /// Field value at a global position (mm)
    fn field(&self, position: &Vector) -> Vector;
}

/// Homogeneous field, identical at every position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantField(pub Vector);

impl ConstantField {
    pub fn new(bx: Scalar, by: Scalar, bz: Scalar) -> Self {
        Self(Vector::new(bx, by, bz))
    }
}

impl MagneticField for ConstantField {
    fn field(&self, _position: &Vector) -> Vector {
        self.0
    }
}
