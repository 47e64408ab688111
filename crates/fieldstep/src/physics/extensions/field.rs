//! Field-only kinematics, the default step evaluation

use super::{Bid, Stage, StepUpdate, StepperExtension};
use crate::physics::math::{Jacobian, Matrix3, Scalar, Vector, cross_columns, index};
use crate::physics::state::{StepData, StepperState};
use std::any::Any;

/// Motion of a particle under the Lorentz force alone
///
/// Bids `1` for every state so that it serves as the fallback whenever no
/// more specialised extension claims the step. Neutral particles get zero
/// stage derivatives and move on a straight line.
///
/// Stage derivatives follow the RKN4 scheme:
///
/// ```text
/// k1 = λ · T × B(x)
/// k2 = λ · (T + h/2 · k1) × B(x + h/2 · T + h²/8 · k1)
/// k3 = λ · (T + h/2 · k2) × B(x + h/2 · T + h²/8 · k1)
/// k4 = λ · (T + h · k3) × B(x + h · T + h²/2 · k3)
/// ```
///
/// with `λ = q/p` fixed over the step.
#[derive(Debug, Clone, Default)]
pub struct FieldExtension {
    qop: Scalar,
}

impl FieldExtension {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepperExtension for FieldExtension {
    fn name(&self) -> &str {
        "field"
    }

    fn bid(&self, _state: &StepperState) -> Bid {
        1
    }

    fn k(
        &mut self,
        state: &StepperState,
        stage: Stage,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
    ) -> Option<Vector> {
        // No curvature is defined for a charged particle at rest
        if state.is_charged() && state.momentum <= 0.0 {
            return None;
        }
        if stage == Stage::K1 {
            self.qop = state.qop();
        }

        let direction = state.direction + h * *k_prev;
        Some(self.qop * direction.cross(field))
    }

    fn finalize(
        &mut self,
        state: &StepperState,
        h: Scalar,
        _data: &StepData,
    ) -> Option<StepUpdate> {
        let inverse_beta = state.inverse_beta();
        inverse_beta.is_finite().then(|| StepUpdate {
            delta_momentum: 0.0,
            delta_time: h * inverse_beta,
        })
    }

    fn transport(
        &mut self,
        state: &StepperState,
        h: Scalar,
        data: &StepData,
    ) -> Option<Jacobian> {
        let qop = [self.qop; 4];
        Some(field_transport(&state.direction, h, data, &qop, &[1.0; 4]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Field-dependent part of the RKN4 transport Jacobian
///
/// Differentiates the stage derivatives with respect to the initial
/// direction `T` and the initial `λ = q/p`, and propagates the result through
/// the RKN4 update formulas:
///
/// ```text
/// ∂x/∂T = h·I + h²/6 · (∂k1 + ∂k2 + ∂k3)/∂T
/// ∂x/∂λ =       h²/6 · (∂k1 + ∂k2 + ∂k3)/∂λ
/// ∂T/∂T =   I + h/6  · (∂k1 + 2∂k2 + 2∂k3 + ∂k4)/∂T
/// ∂T/∂λ =       h/6  · (∂k1 + 2∂k2 + 2∂k3 + ∂k4)/∂λ
/// ```
///
/// Only the terms beyond the free-propagation Jacobian are returned. `qop`
/// holds the `q/p` used at each stage and `dqop` its derivative with respect
/// to the initial `q/p` (all ones without energy loss). The field gradient is
/// neglected, so the position columns carry no correction.
pub(crate) fn field_transport(
    direction: &Vector,
    h: Scalar,
    data: &StepData,
    qop: &[Scalar; 4],
    dqop: &[Scalar; 4],
) -> Jacobian {
    let half_h = 0.5 * h;
    let identity = Matrix3::identity();

    let dk1dl = dqop[0] * direction.cross(&data.b_first);
    let dk2dl = dqop[1] * (direction + half_h * data.k1).cross(&data.b_middle)
        + qop[1] * half_h * dk1dl.cross(&data.b_middle);
    let dk3dl = dqop[2] * (direction + half_h * data.k2).cross(&data.b_middle)
        + qop[2] * half_h * dk2dl.cross(&data.b_middle);
    let dk4dl = dqop[3] * (direction + h * data.k3).cross(&data.b_last)
        + qop[3] * h * dk3dl.cross(&data.b_last);

    let dk1dt = qop[0] * cross_columns(&identity, &data.b_first);
    let dk2dt = qop[1] * cross_columns(&(identity + half_h * dk1dt), &data.b_middle);
    let dk3dt = qop[2] * cross_columns(&(identity + half_h * dk2dt), &data.b_middle);
    let dk4dt = qop[3] * cross_columns(&(identity + h * dk3dt), &data.b_last);

    let mut correction = Jacobian::zeros();
    correction
        .fixed_view_mut::<3, 3>(index::POSITION, index::DIRECTION)
        .copy_from(&(h * h / 6.0 * (dk1dt + dk2dt + dk3dt)));
    correction
        .fixed_view_mut::<3, 1>(index::POSITION, index::QOP)
        .copy_from(&(h * h / 6.0 * (dk1dl + dk2dl + dk3dl)));
    correction
        .fixed_view_mut::<3, 3>(index::DIRECTION, index::DIRECTION)
        .copy_from(&(h / 6.0 * (dk1dt + 2.0 * (dk2dt + dk3dt) + dk4dt)));
    correction
        .fixed_view_mut::<3, 1>(index::DIRECTION, index::QOP)
        .copy_from(&(h / 6.0 * (dk1dl + 2.0 * (dk2dl + dk3dl) + dk4dl)));
    correction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(charge: Scalar) -> StepperState {
        StepperState::new(Vector::zeros(), Vector::x(), 2.0, charge, 0.105_658)
    }

    #[test]
    fn test_k1_is_lorentz_force() {
        let mut extension = FieldExtension::new();
        let field = Vector::new(0.0, 0.0, 1e-3);
        let k1 = extension
            .k(&state(1.0), Stage::K1, &field, 0.0, &Vector::zeros())
            .unwrap();

        // q/p = 0.5, x × z = -y
        assert!((k1 - Vector::new(0.0, -0.5e-3, 0.0)).norm() < 1e-18);
    }

    #[test]
    fn test_later_stages_use_previous_derivative() {
        let mut extension = FieldExtension::new();
        let field = Vector::new(0.0, 0.0, 1e-3);
        let state = state(1.0);
        let k1 = extension
            .k(&state, Stage::K1, &field, 0.0, &Vector::zeros())
            .unwrap();
        let k2 = extension.k(&state, Stage::K2, &field, 10.0, &k1).unwrap();

        let expected = 0.5 * (Vector::x() + 10.0 * k1).cross(&field);
        assert!((k2 - expected).norm() < 1e-18);
    }

    #[test]
    fn test_neutral_particle_moves_straight() {
        let mut extension = FieldExtension::new();
        let k1 = extension
            .k(&state(0.0), Stage::K1, &Vector::z(), 0.0, &Vector::zeros())
            .unwrap();
        assert_eq!(k1, Vector::zeros());
        assert_eq!(extension.bid(&state(0.0)), 1);
    }

    #[test]
    fn test_finalize_reports_flight_time() {
        let mut extension = FieldExtension::new();
        let state = state(1.0);
        let update = extension
            .finalize(&state, 100.0, &StepData::default())
            .unwrap();
        assert_eq!(update.delta_momentum, 0.0);
        assert!((update.delta_time - 100.0 * state.inverse_beta()).abs() < 1e-12);
    }

    #[test]
    fn test_stages_fail_for_charged_particle_at_rest() {
        let mut extension = FieldExtension::new();
        let mut state = state(1.0);
        state.momentum = 0.0;
        let field = Vector::new(0.0, 0.0, 1e-3);

        assert!(extension.k(&state, Stage::K1, &field, 0.0, &Vector::zeros()).is_none());
        assert!(extension.k(&state, Stage::K2, &field, 5.0, &Vector::zeros()).is_none());

        // A neutral particle at rest still moves straight
        state.charge = 0.0;
        assert_eq!(
            extension.k(&state, Stage::K1, &field, 0.0, &Vector::zeros()),
            Some(Vector::zeros())
        );
    }

    #[test]
    fn test_finalize_fails_without_momentum() {
        let mut extension = FieldExtension::new();
        let mut state = state(1.0);
        state.momentum = 0.0;
        assert!(extension.finalize(&state, 1.0, &StepData::default()).is_none());
    }

    #[test]
    fn test_transport_without_field_is_zero() {
        let correction = field_transport(
            &Vector::x(),
            5.0,
            &StepData::default(),
            &[0.5; 4],
            &[1.0; 4],
        );
        assert_eq!(correction, Jacobian::zeros());
    }
}
