//! Step evaluation in dense material with continuous energy loss

use super::field::field_transport;
use super::{Bid, Stage, StepUpdate, StepperExtension};
use crate::physics::math::{self, Jacobian, Scalar, Vector, index};
use crate::physics::state::{StepData, StepperState};
use std::any::Any;

/// Kinematics of a charged particle losing energy while it crosses material
///
/// The momentum entering each stage is degraded by the material's stopping
/// power over the path already covered at that stage (`0`, `h/2`, `h/2`,
/// `h`), so the bending grows as the particle slows down. This extension
/// overlaps with [`FieldExtension`](super::FieldExtension) and outbids it
/// with `2` whenever it applies.
#[derive(Debug, Clone)]
pub struct DenseEnvironmentExtension {
    /// Below this momentum (GeV) the extension declines the step
    pub momentum_cutoff: Scalar,
    initial_momentum: Scalar,
    initial_energy: Scalar,
    stopping_power: Scalar,
    /// q/p entering each stage
    qop: [Scalar; 4],
    /// Derivative of each stage's q/p with respect to the initial q/p
    dqop: [Scalar; 4],
}

/// Kinematics after losing energy over a path length
#[derive(Debug, Clone, Copy)]
struct Degraded {
    momentum: Scalar,
    energy: Scalar,
    qop: Scalar,
    dqop: Scalar,
}

impl DenseEnvironmentExtension {
    pub fn new(momentum_cutoff: Scalar) -> Self {
        Self {
            momentum_cutoff,
            initial_momentum: 0.0,
            initial_energy: 0.0,
            stopping_power: 0.0,
            qop: [0.0; 4],
            dqop: [1.0; 4],
        }
    }

    fn degrade(&self, state: &StepperState, path: Scalar) -> Option<Degraded> {
        let energy = self.initial_energy - path * self.stopping_power;
        let momentum = math::momentum_from_energy(energy, state.mass)?;

        // d(q/p)/d(q/p)₀ = p₀³ E / (p³ E₀) for a momentum-independent dE/dx
        let ratio = self.initial_momentum / momentum;
        let dqop = ratio * ratio * ratio * energy / self.initial_energy;

        Some(Degraded {
            momentum,
            energy,
            qop: state.charge / momentum,
            dqop,
        })
    }
}

impl Default for DenseEnvironmentExtension {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl StepperExtension for DenseEnvironmentExtension {
    fn name(&self) -> &str {
        "dense_environment"
    }

    fn bid(&self, state: &StepperState) -> Bid {
        let kinematics_ok = state.is_charged()
            && state.mass > 0.0
            && state.momentum > 0.0
            && state.momentum >= self.momentum_cutoff;

        if kinematics_ok && state.material.is_some() {
            2
        } else {
            0
        }
    }

    fn k(
        &mut self,
        state: &StepperState,
        stage: Stage,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
    ) -> Option<Vector> {
        if stage == Stage::K1 {
            self.initial_momentum = state.momentum;
            self.initial_energy = state.energy();
            self.stopping_power = state.material?.stopping_power;
        }

        let degraded = self.degrade(state, h)?;
        let i = stage.index();
        self.qop[i] = degraded.qop;
        self.dqop[i] = degraded.dqop;

        let direction = state.direction + h * *k_prev;
        Some(degraded.qop * direction.cross(field))
    }

    fn finalize(
        &mut self,
        state: &StepperState,
        h: Scalar,
        _data: &StepData,
    ) -> Option<StepUpdate> {
        let middle = self.degrade(state, 0.5 * h)?;
        let end = self.degrade(state, h)?;

        // Simpson's rule over 1/β = E/p
        let inverse_beta = |energy: Scalar, momentum: Scalar| energy / momentum;
        let delta_time = h / 6.0
            * (inverse_beta(self.initial_energy, self.initial_momentum)
                + 4.0 * inverse_beta(middle.energy, middle.momentum)
                + inverse_beta(end.energy, end.momentum));

        Some(StepUpdate {
            delta_momentum: end.momentum - self.initial_momentum,
            delta_time,
        })
    }

    fn transport(
        &mut self,
        state: &StepperState,
        h: Scalar,
        data: &StepData,
    ) -> Option<Jacobian> {
        let end = self.degrade(state, h)?;

        let mut correction = field_transport(&state.direction, h, data, &self.qop, &self.dqop);
        correction[(index::QOP, index::QOP)] += end.dqop - 1.0;
        Some(correction)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
