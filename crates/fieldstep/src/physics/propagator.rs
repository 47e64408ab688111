//! Propagation of a particle over a fixed path length

use crate::config::{ConfigError, FieldstepConfig};
use crate::physics::extensions::{Bid, ExtensionList};
use crate::physics::field::MagneticField;
use crate::physics::material::{MaterialMap, NoMaterial};
use crate::physics::math::{Scalar, Vector};
use crate::physics::state::StepperState;
use crate::physics::stepper::{PropagationError, RknStepper, StepOutcome};
use tracing::{debug, info, warn};

/// Remaining path below which propagation counts as complete, mm
const PATH_EPSILON: Scalar = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct PropagatorOptions {
    /// mm
    pub path_limit: Scalar,
    pub max_steps: usize,
    pub record_trajectory: bool,
}

impl Default for PropagatorOptions {
    fn default() -> Self {
        Self {
            path_limit: 1000.0,
            max_steps: 1000,
            record_trajectory: true,
        }
    }
}

/// State after an accepted step, with the arbitration that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub position: Vector,
    pub direction: Vector,
    pub momentum: Scalar,
    pub time: Scalar,
    pub path_length: Scalar,
    pub outcome: StepOutcome,
    pub bids: Vec<Bid>,
    pub validity: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct PropagationResult {
    pub state: StepperState,
    pub trajectory: Vec<StepRecord>,
    pub steps: usize,
}

/// Drives the stepper through a field and material description
pub struct Propagator {
    pub stepper: RknStepper,
    extensions: ExtensionList,
    field: Box<dyn MagneticField>,
    material: Box<dyn MaterialMap>,
    pub options: PropagatorOptions,
}

impl Propagator {
    pub fn new(
        stepper: RknStepper,
        extensions: ExtensionList,
        field: impl MagneticField + 'static,
    ) -> Self {
        Self {
            stepper,
            extensions,
            field: Box::new(field),
            material: Box::new(NoMaterial),
            options: PropagatorOptions::default(),
        }
    }

    pub fn with_material(mut self, material: impl MaterialMap + 'static) -> Self {
        self.material = Box::new(material);
        self
    }

    pub fn with_boxed_material(mut self, material: Box<dyn MaterialMap>) -> Self {
        self.material = material;
        self
    }

    pub fn with_options(mut self, options: PropagatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Assemble stepper, extensions, field and material from configuration
    pub fn from_config(config: &FieldstepConfig) -> Result<Self, ConfigError> {
        config.check()?;

        let options = PropagatorOptions {
            path_limit: config.propagation.path_limit,
            max_steps: config.propagation.max_steps,
            record_trajectory: config.propagation.record_trajectory,
        };

        Ok(Self::new(
            RknStepper::new(config.stepper.clone()),
            config.extension_list()?,
            config.magnetic_field(),
        )
        .with_boxed_material(config.material_map())
        .with_options(options))
    }

    pub fn extensions(&self) -> &ExtensionList {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionList {
        &mut self.extensions
    }

    /// Step `state` until it has covered the path limit.
    ///
    /// The last step is clipped to the remaining path. With covariance
    /// transport enabled the accumulated Jacobian is applied to the
    /// covariance once at the end.
    pub fn propagate(
        &mut self,
        mut state: StepperState,
    ) -> Result<PropagationResult, PropagationError> {
        let mut trajectory = Vec::new();
        let mut steps = 0;

        info!(
            extensions = ?self.extensions.names().collect::<Vec<_>>(),
            auctioneer = self.extensions.auctioneer().name(),
            path_limit = self.options.path_limit,
            "starting propagation"
        );

        loop {
            let remaining = self.options.path_limit - state.path_length;
            if remaining <= PATH_EPSILON {
                break;
            }
            if steps >= self.options.max_steps {
                warn!(steps, path = state.path_length, "step limit reached");
                return Err(PropagationError::MaxStepsExceeded {
                    max_steps: self.options.max_steps,
                });
            }

            state.material = self.material.material(&state.position);
            if state.step_size > remaining {
                debug!(remaining, "clipping step to path limit");
                state.step_size = remaining;
            }

            let outcome = self
                .stepper
                .step(&mut state, &mut self.extensions, self.field.as_ref())
                .inspect_err(|e| warn!(path = state.path_length, "propagation aborted: {e}"))?;
            steps += 1;

            if self.options.record_trajectory {
                trajectory.push(StepRecord {
                    position: state.position,
                    direction: state.direction,
                    momentum: state.momentum,
                    time: state.time,
                    path_length: state.path_length,
                    outcome,
                    bids: self.extensions.bids().to_vec(),
                    validity: self.extensions.validity().to_vec(),
                });
            }
        }

        if state.covariance_transport {
            state.transport_covariance();
        }

        info!(
            steps,
            path = state.path_length,
            momentum = state.momentum,
            "propagation finished"
        );

        Ok(PropagationResult {
            state,
            trajectory,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::extensions::{
        DenseEnvironmentExtension, FieldExtension, HighestBidAuctioneer,
    };
    use crate::physics::field::ConstantField;
    use crate::physics::material::{Material, MaterialBox};

    fn muon() -> StepperState {
        StepperState::new(Vector::zeros(), Vector::x(), 1.0, -1.0, 0.105_658)
            .with_step_size(100.0)
    }

    fn standard_list() -> ExtensionList {
        ExtensionList::builder()
            .with(FieldExtension::new())
            .with(DenseEnvironmentExtension::default())
            .auctioneer(HighestBidAuctioneer)
            .build()
            .unwrap()
    }

    #[test]
    fn test_reaches_path_limit_exactly() {
        let mut propagator = Propagator::new(
            RknStepper::default(),
            standard_list(),
            ConstantField::new(0.0, 0.0, 2.0),
        )
        .with_options(PropagatorOptions {
            path_limit: 250.0,
            ..PropagatorOptions::default()
        });

        let result = propagator.propagate(muon()).unwrap();
        assert!((result.state.path_length - 250.0).abs() < 1e-9);
        assert_eq!(result.trajectory.len(), result.steps);

        let last = result.trajectory.last().unwrap();
        assert_eq!(last.position, result.state.position);
        // Vacuum: the dense extension bids nothing and loses the auction
        assert_eq!(last.bids, [1, 0]);
        assert_eq!(last.validity, [true, false]);
    }

    #[test]
    fn test_material_switches_extension() {
        let material = MaterialBox::new(
            Vector::new(50.0, -1e3, -1e3),
            Vector::new(300.0, 1e3, 1e3),
            Material::new(1e-3),
        );
        let mut propagator = Propagator::new(
            RknStepper::default(),
            standard_list(),
            ConstantField::new(0.0, 0.0, 0.0),
        )
        .with_material(material)
        .with_options(PropagatorOptions {
            path_limit: 400.0,
            ..PropagatorOptions::default()
        });

        let result = propagator.propagate(muon()).unwrap();

        assert!(result.state.momentum < 1.0);
        assert!(
            result
                .trajectory
                .iter()
                .any(|record| record.validity == [false, true])
        );
    }

    #[test]
    fn test_step_limit() {
        let mut propagator = Propagator::new(
            RknStepper::default(),
            standard_list(),
            ConstantField::new(0.0, 0.0, 0.0),
        )
        .with_options(PropagatorOptions {
            path_limit: 1000.0,
            max_steps: 2,
            record_trajectory: false,
        });

        let state = muon().with_step_size(10.0);
        let err = propagator.propagate(state).unwrap_err();
        assert_eq!(err, PropagationError::MaxStepsExceeded { max_steps: 2 });
    }

    #[test]
    fn test_from_default_config() {
        let config = FieldstepConfig::default();
        let mut propagator = Propagator::from_config(&config).unwrap();
        assert_eq!(propagator.extensions().len(), 2);

        let result = propagator.propagate(config.initial_state()).unwrap();
        assert!((result.state.path_length - config.propagation.path_limit).abs() < 1e-9);
        assert!((result.state.momentum - config.particle.momentum).abs() < 1e-15);
    }

    #[test]
    fn test_covariance_is_transported_once() {
        let mut config = FieldstepConfig::default();
        config.propagation.covariance_transport = true;
        config.propagation.path_limit = 100.0;
        let mut propagator = Propagator::from_config(&config).unwrap();

        let initial = config.initial_state();
        let result = propagator.propagate(initial.clone()).unwrap();

        assert_eq!(result.state.jacobian, crate::physics::math::Jacobian::identity());
        let before = initial.covariance.unwrap();
        let after = result.state.covariance.unwrap();
        // Position uncertainty grows with the direction uncertainty
        assert!(after[(1, 1)] > before[(1, 1)]);
    }
}
