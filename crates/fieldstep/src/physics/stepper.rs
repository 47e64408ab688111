//! Adaptive Runge-Kutta-Nyström stepping
//!
//! The stepper owns step-size control and field sampling. Everything that
//! depends on the physics of the step is delegated to an [`ExtensionList`].

use crate::config::StepperConfig;
use crate::physics::extensions::{Bid, ExtensionList};
use crate::physics::field::MagneticField;
use crate::physics::math::{FIELD_TO_CURVATURE, Jacobian, Scalar, Vector};
use crate::physics::state::{StepData, StepperState};
use thiserror::Error;
use tracing::{debug, trace};

/// Smallest error estimate, keeps the step-size scaling finite
const MIN_ERROR: Scalar = 1e-20;

/// Bounds of the step-size scaling between trials and between steps
const MIN_SCALING: Scalar = 0.25;
const MAX_SCALING: Scalar = 4.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropagationError {
    #[error("no extension accepted the step (bids: {bids:?})")]
    NoValidExtension { bids: Vec<Bid> },
    #[error("stage evaluation failed for a step of {step_size} mm")]
    StageFailed { step_size: Scalar },
    #[error("finalizing a step of {step_size} mm failed")]
    FinalizeFailed { step_size: Scalar },
    #[error("step size {step_size} mm fell below the cutoff of {cutoff} mm")]
    StepSizeStalled { step_size: Scalar, cutoff: Scalar },
    #[error("step not accepted after {trials} trials")]
    TooManyTrials { trials: usize },
    #[error("propagation did not reach its path limit within {max_steps} steps")]
    MaxStepsExceeded { max_steps: usize },
}

/// Summary of one accepted step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Length of the accepted step, mm
    pub step_size: Scalar,
    /// Local error estimate of the accepted step
    pub error: Scalar,
    /// Step sizes tried, including the accepted one
    pub trials: usize,
}

/// Fourth-order Runge-Kutta-Nyström stepper with embedded error control
///
/// A trial step of length `h` samples the field three times:
///
/// ```text
/// B_first  = B(x)
/// B_middle = B(x + h/2 · T + h²/8 · k1)
/// B_last   = B(x + h · T + h²/2 · k3)
/// ```
///
/// and estimates its local error as `h² · ‖k1 − k2 − k3 + k4‖₁`. Trials
/// above the tolerance are repeated with a smaller `h` until one is
/// accepted or the step size stalls.
#[derive(Debug, Clone, Default)]
pub struct RknStepper {
    pub config: StepperConfig,
}

impl RknStepper {
    pub fn new(config: StepperConfig) -> Self {
        Self { config }
    }

    /// Take one adaptive step from `state`, starting from the trial size in
    /// `state.step_size`.
    ///
    /// On success the state is advanced and `state.step_size` holds the
    /// suggested size of the next step.
    pub fn step(
        &self,
        state: &mut StepperState,
        extensions: &mut ExtensionList,
        field: &dyn MagneticField,
    ) -> Result<StepOutcome, PropagationError> {
        let mut data = self.begin(state, extensions, field)?;
        let mut h = state.step_size.min(self.config.max_step_size);
        let mut trials = 0;

        let error = loop {
            trials += 1;
            if trials > self.config.max_step_trials {
                return Err(PropagationError::TooManyTrials {
                    trials: self.config.max_step_trials,
                });
            }

            let scaling = match trial(state, extensions, field, h, &mut data) {
                Some(error) if error <= self.config.tolerance => break error,
                Some(error) => {
                    trace!(h, error, "step rejected");
                    step_scaling(self.config.tolerance / (2.0 * error))
                }
                None => {
                    trace!(h, "stage evaluation failed, shrinking step");
                    MIN_SCALING
                }
            };

            h *= scaling;
            if h.abs() < self.config.step_size_cutoff {
                return Err(PropagationError::StepSizeStalled {
                    step_size: h,
                    cutoff: self.config.step_size_cutoff,
                });
            }
        };

        finish(state, extensions, h, &data)?;

        let next = h * step_scaling(self.config.tolerance / error);
        state.step_size = next.min(self.config.max_step_size);

        debug!(
            h,
            error,
            trials,
            next = state.step_size,
            path = state.path_length,
            "step accepted"
        );

        Ok(StepOutcome {
            step_size: h,
            error,
            trials,
        })
    }

    /// Take one step of exactly `h` without error control.
    ///
    /// `state.step_size` is left untouched.
    pub fn step_fixed(
        &self,
        state: &mut StepperState,
        extensions: &mut ExtensionList,
        field: &dyn MagneticField,
        h: Scalar,
    ) -> Result<StepOutcome, PropagationError> {
        let mut data = self.begin(state, extensions, field)?;
        let error = trial(state, extensions, field, h, &mut data)
            .ok_or(PropagationError::StageFailed { step_size: h })?;
        finish(state, extensions, h, &data)?;

        Ok(StepOutcome {
            step_size: h,
            error,
            trials: 1,
        })
    }

    /// Arbitrate the step and evaluate its first stage, which does not
    /// depend on the step size.
    fn begin(
        &self,
        state: &StepperState,
        extensions: &mut ExtensionList,
        field: &dyn MagneticField,
    ) -> Result<StepData, PropagationError> {
        let mut data = StepData {
            b_first: FIELD_TO_CURVATURE * field.field(&state.position),
            ..StepData::default()
        };

        if !extensions.compute_validity(state) {
            return Err(PropagationError::NoValidExtension {
                bids: extensions.bids().to_vec(),
            });
        }
        trace!(bids = ?extensions.bids(), valid = ?extensions.validity(), "auction");

        if !extensions.k1(state, &data.b_first, &mut data.k1) {
            return Err(PropagationError::StageFailed { step_size: 0.0 });
        }
        Ok(data)
    }
}

/// Evaluate stages two to four for a step of `h`, returning the error
/// estimate or `None` if a stage failed.
fn trial(
    state: &StepperState,
    extensions: &mut ExtensionList,
    field: &dyn MagneticField,
    h: Scalar,
    data: &mut StepData,
) -> Option<Scalar> {
    let half_h = 0.5 * h;
    let h2 = h * h;

    let middle = state.position + half_h * state.direction + h2 / 8.0 * data.k1;
    data.b_middle = FIELD_TO_CURVATURE * field.field(&middle);

    if !extensions.k2(state, &data.b_middle, half_h, &data.k1, &mut data.k2) {
        return None;
    }
    if !extensions.k3(state, &data.b_middle, half_h, &data.k2, &mut data.k3) {
        return None;
    }

    let last = state.position + h * state.direction + h2 / 2.0 * data.k3;
    data.b_last = FIELD_TO_CURVATURE * field.field(&last);

    if !extensions.k4(state, &data.b_last, h, &data.k3, &mut data.k4) {
        return None;
    }

    let difference: Vector = data.k1 - data.k2 - data.k3 + data.k4;
    Some((h2 * difference.lp_norm(1)).max(MIN_ERROR))
}

/// Advance the state over the accepted step, accumulating the transport
/// Jacobian when covariance transport is on.
///
/// On failure the state is left as it was before the step.
fn finish(
    state: &mut StepperState,
    extensions: &mut ExtensionList,
    h: Scalar,
    data: &StepData,
) -> Result<(), PropagationError> {
    if !state.covariance_transport {
        return extensions
            .finalize(state, h, data)
            .then_some(())
            .ok_or(PropagationError::FinalizeFailed { step_size: h });
    }

    let mut transport = Jacobian::identity();
    if !extensions.finalize_with_jacobian(state, h, data, &mut transport) {
        return Err(PropagationError::FinalizeFailed { step_size: h });
    }
    state.jacobian = transport * state.jacobian;
    Ok(())
}

/// Step-size scaling for a tolerance-to-error ratio
fn step_scaling(ratio: Scalar) -> Scalar {
    libm::sqrt(libm::sqrt(ratio.abs())).clamp(MIN_SCALING, MAX_SCALING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::extensions::{
        DenseEnvironmentExtension, FieldExtension, FirstAcceptableAuctioneer,
        HighestBidAuctioneer, Stage, StepUpdate, StepperExtension,
    };
    use crate::physics::field::ConstantField;
    use crate::physics::material::Material;
    use crate::physics::math::{Covariance, free_transport};
    use std::any::Any;

    fn field_only() -> ExtensionList {
        ExtensionList::builder()
            .with(FieldExtension::new())
            .build()
            .unwrap()
    }

    fn muon(momentum: Scalar) -> StepperState {
        StepperState::new(Vector::zeros(), Vector::x(), momentum, -1.0, 0.105_658)
    }

    /// Refuses every step
    struct Declining;

    impl StepperExtension for Declining {
        fn name(&self) -> &str {
            "declining"
        }

        fn bid(&self, _state: &StepperState) -> Bid {
            -3
        }

        fn k(
            &mut self,
            _state: &StepperState,
            _stage: Stage,
            _field: &Vector,
            _h: Scalar,
            _k_prev: &Vector,
        ) -> Option<Vector> {
            Some(Vector::zeros())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Evaluates every stage but cannot finalize
    struct Unfinished;

    impl StepperExtension for Unfinished {
        fn name(&self) -> &str {
            "unfinished"
        }

        fn bid(&self, _state: &StepperState) -> Bid {
            1
        }

        fn k(
            &mut self,
            _state: &StepperState,
            _stage: Stage,
            _field: &Vector,
            _h: Scalar,
            _k_prev: &Vector,
        ) -> Option<Vector> {
            Some(Vector::zeros())
        }

        fn finalize(
            &mut self,
            _state: &StepperState,
            _h: Scalar,
            _data: &StepData,
        ) -> Option<StepUpdate> {
            None
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Fails every stage after the first
    struct Unstable;

    impl StepperExtension for Unstable {
        fn name(&self) -> &str {
            "unstable"
        }

        fn bid(&self, _state: &StepperState) -> Bid {
            1
        }

        fn k(
            &mut self,
            _state: &StepperState,
            stage: Stage,
            _field: &Vector,
            _h: Scalar,
            _k_prev: &Vector,
        ) -> Option<Vector> {
            (stage == Stage::K1).then(Vector::zeros)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_straight_line_without_field() {
        let stepper = RknStepper::default();
        let mut list = field_only();
        let mut state = muon(1.0).with_step_size(100.0);

        let outcome = stepper
            .step(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 0.0))
            .unwrap();

        assert_eq!(outcome.step_size, 100.0);
        assert_eq!(outcome.trials, 1);
        assert_eq!(outcome.error, MIN_ERROR);
        assert_eq!(state.position, Vector::new(100.0, 0.0, 0.0));
        assert_eq!(state.path_length, 100.0);
        // Next step grows by the maximum factor
        assert_eq!(state.step_size, 400.0);
    }

    #[test]
    fn test_step_size_is_capped() {
        let stepper = RknStepper::default();
        let mut list = field_only();
        let mut state = muon(1.0);
        assert_eq!(state.step_size, Scalar::INFINITY);

        let outcome = stepper
            .step(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(outcome.step_size, stepper.config.max_step_size);
        assert_eq!(state.step_size, stepper.config.max_step_size);
    }

    #[test]
    fn test_strong_field_shrinks_step() {
        let stepper = RknStepper::default();
        let mut list = field_only();
        let mut state = muon(0.2).with_step_size(1000.0);
        let field = ConstantField::new(0.0, 0.0, 4.0);

        let outcome = stepper.step(&mut state, &mut list, &field).unwrap();

        assert!(outcome.trials > 1);
        assert!(outcome.step_size < 1000.0);
        assert!(outcome.error <= stepper.config.tolerance);
        assert!((state.direction.norm() - 1.0).abs() < 1e-12);
        // The track bends in the transverse plane only
        assert!(state.position.z.abs() < 1e-12);
    }

    #[test]
    fn test_no_valid_extension_reports_bids() {
        let stepper = RknStepper::default();
        let mut list = ExtensionList::builder()
            .with(Declining)
            .auctioneer(FirstAcceptableAuctioneer)
            .build()
            .unwrap();
        let mut state = muon(1.0).with_step_size(10.0);
        let before = state.clone();

        let err = stepper
            .step(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 2.0))
            .unwrap_err();

        assert_eq!(err, PropagationError::NoValidExtension { bids: vec![-3] });
        assert_eq!(state, before);
    }

    #[test]
    fn test_failing_stages_stall_the_step() {
        let stepper = RknStepper::default();
        let mut list = ExtensionList::builder().with(Unstable).build().unwrap();
        let mut state = muon(1.0).with_step_size(10.0);

        let err = stepper
            .step(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 2.0))
            .unwrap_err();
        assert!(matches!(err, PropagationError::StepSizeStalled { .. }));
        assert_eq!(state.path_length, 0.0);
    }

    #[test]
    fn test_trial_limit() {
        let stepper = RknStepper::new(StepperConfig {
            max_step_trials: 2,
            ..StepperConfig::default()
        });
        let mut list = ExtensionList::builder().with(Unstable).build().unwrap();
        let mut state = muon(1.0).with_step_size(10.0);

        let err = stepper
            .step(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 2.0))
            .unwrap_err();
        assert_eq!(err, PropagationError::TooManyTrials { trials: 2 });
    }

    #[test]
    fn test_fixed_step_ignores_tolerance() {
        let stepper = RknStepper::new(StepperConfig {
            tolerance: 1e-12,
            ..StepperConfig::default()
        });
        let mut list = field_only();
        let mut state = muon(0.5).with_step_size(7.0);

        let outcome = stepper
            .step_fixed(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 2.0), 50.0)
            .unwrap();

        assert_eq!(outcome.step_size, 50.0);
        assert!(outcome.error > 1e-12);
        assert_eq!(state.path_length, 50.0);
        assert_eq!(state.step_size, 7.0);
    }

    #[test]
    fn test_jacobian_accumulates_over_steps() {
        let stepper = RknStepper::default();
        let mut list = field_only();
        let mut state = muon(1.0)
            .with_covariance(Covariance::identity())
            .with_step_size(10.0);
        let field = ConstantField::new(0.0, 0.0, 0.0);

        stepper.step_fixed(&mut state, &mut list, &field, 10.0).unwrap();
        stepper.step_fixed(&mut state, &mut list, &field, 15.0).unwrap();

        // Straight-line transports compose additively in the step length
        assert_eq!(state.jacobian, free_transport(25.0));
    }

    #[test]
    fn test_failed_finalize_keeps_state() {
        let stepper = RknStepper::default();
        let mut list = ExtensionList::builder().with(Unfinished).build().unwrap();
        let field = ConstantField::new(0.0, 0.0, 2.0);

        for covariance in [false, true] {
            let mut state = muon(1.0).with_step_size(10.0);
            if covariance {
                state = state.with_covariance(Covariance::identity());
            }
            let before = state.clone();

            let err = stepper.step(&mut state, &mut list, &field).unwrap_err();
            assert_eq!(err, PropagationError::FinalizeFailed { step_size: 10.0 });
            assert_eq!(state, before);

            let err = stepper
                .step_fixed(&mut state, &mut list, &field, 5.0)
                .unwrap_err();
            assert_eq!(err, PropagationError::FinalizeFailed { step_size: 5.0 });
            assert_eq!(state, before);
        }
    }

    #[test]
    fn test_charged_particle_at_rest_is_rejected() {
        let stepper = RknStepper::default();
        let mut list = field_only();
        let mut state = muon(0.0).with_step_size(10.0);
        let before = state.clone();

        let err = stepper
            .step(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 2.0))
            .unwrap_err();
        assert_eq!(err, PropagationError::StageFailed { step_size: 0.0 });
        assert_eq!(state, before);
    }

    #[test]
    fn test_particle_stopping_inside_fixed_step_fails() {
        let stepper = RknStepper::default();
        let mut list = ExtensionList::builder()
            .with(FieldExtension::new())
            .with(DenseEnvironmentExtension::default())
            .auctioneer(HighestBidAuctioneer)
            .build()
            .unwrap();
        let mut state = muon(0.2);
        state.material = Some(Material::new(1e-3));
        let before = state.clone();

        // 1 MeV/mm over 1 m removes far more than the total energy
        let err = stepper
            .step_fixed(&mut state, &mut list, &ConstantField::new(0.0, 0.0, 2.0), 1000.0)
            .unwrap_err();
        assert_eq!(err, PropagationError::StageFailed { step_size: 1000.0 });
        assert_eq!(list.validity(), [false, true]);
        assert_eq!(state, before);
    }
}
