//! Propagation state advanced by the stepper

use crate::physics::material::Material;
use crate::physics::math::{self, Covariance, Jacobian, Scalar, Vector};

/// Kinematic state of a single particle between steps
///
/// Extensions read this state during bidding and stage evaluation; only the
/// extension list (in finalize) and the stepper write to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepperState {
    /// Global position, mm
    pub position: Vector,
    /// Unit direction of flight
    pub direction: Vector,
    /// Momentum magnitude, GeV
    pub momentum: Scalar,
    /// Charge in units of e
    pub charge: Scalar,
    /// Rest mass, GeV
    pub mass: Scalar,
    /// Time, mm/c
    pub time: Scalar,
    /// Path length accumulated since the start of propagation, mm
    pub path_length: Scalar,
    /// Trial size of the next step, mm
    pub step_size: Scalar,
    /// Material at the current position, refreshed before every step
    pub material: Option<Material>,
    /// Transport Jacobian accumulated since the last covariance transport
    pub jacobian: Jacobian,
    pub covariance: Option<Covariance>,
    /// Whether steps assemble the transport Jacobian
    pub covariance_transport: bool,
}

impl StepperState {
    /// New state at `position` moving along `direction` (normalised here)
    pub fn new(
        position: Vector,
        direction: Vector,
        momentum: Scalar,
        charge: Scalar,
        mass: Scalar,
    ) -> Self {
        Self {
            position,
            direction: direction.normalize(),
            momentum,
            charge,
            mass,
            time: 0.0,
            path_length: 0.0,
            step_size: Scalar::INFINITY,
            material: None,
            jacobian: Jacobian::identity(),
            covariance: None,
            covariance_transport: false,
        }
    }

    /// Attach a covariance and enable Jacobian assembly.
    pub fn with_covariance(mut self, covariance: Covariance) -> Self {
        self.covariance = Some(covariance);
        self.covariance_transport = true;
        self
    }

    pub fn with_step_size(mut self, step_size: Scalar) -> Self {
        self.step_size = step_size;
        self
    }

    /// Charge over momentum, e/GeV
    pub fn qop(&self) -> Scalar {
        if self.momentum > 0.0 {
            self.charge / self.momentum
        } else {
            0.0
        }
    }

    pub fn energy(&self) -> Scalar {
        math::energy(self.momentum, self.mass)
    }

    /// `1/β = E/p`, the time elapsed per unit path length
    pub fn inverse_beta(&self) -> Scalar {
        self.energy() / self.momentum
    }

    pub fn is_charged(&self) -> bool {
        self.charge != 0.0
    }

    /// Apply the accumulated Jacobian to the covariance, `C = J C Jᵀ`, and
    /// restart accumulation from the identity.
    pub fn transport_covariance(&mut self) {
        if let Some(covariance) = self.covariance.as_mut() {
            *covariance = self.jacobian * *covariance * self.jacobian.transpose();
        }
        self.jacobian = Jacobian::identity();
    }
}

/// Field samples and combined stage derivatives of one RKN4 step
///
/// Fields are stored in curvature units (already scaled by
/// [`FIELD_TO_CURVATURE`](crate::physics::math::FIELD_TO_CURVATURE)).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepData {
    pub b_first: Vector,
    pub b_middle: Vector,
    pub b_last: Vector,
    pub k1: Vector,
    pub k2: Vector,
    pub k3: Vector,
    pub k4: Vector,
}
