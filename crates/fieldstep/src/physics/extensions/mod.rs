//! Pluggable step evaluation for the RKN4 stepper
//!
//! A step's derivatives are not computed by the stepper itself but by a list
//! of extensions. Extensions fall into two groups:
//!
//! - those that own the step evaluation and must not run alongside another
//!   extension of the same kind, since their contributions would overlap
//!   (field-only kinematics vs. kinematics with energy loss);
//! - those that only add independent terms on top of the evaluation.
//!
//! Every extension can judge whether it applies to the upcoming step, but
//! none of them sees the others. Each step therefore starts with every
//! extension placing a [`Bid`], and an [`Auctioneer`] with the full view
//! turns the bids into a validity mask. Only valid extensions take part in
//! the four stage evaluations and the finalize call of that step.

use crate::physics::math::{Jacobian, Scalar, Vector};
use crate::physics::state::{StepData, StepperState};
use std::any::Any;

pub mod auctioneer;
pub mod dense;
pub mod field;
pub mod list;
pub mod registry;

pub use auctioneer::{
    Auctioneer, FirstAcceptableAuctioneer, HighestBidAuctioneer, PermissiveAuctioneer,
};
pub use dense::DenseEnvironmentExtension;
pub use field::FieldExtension;
pub use list::{CompositionError, ExtensionList, ExtensionListBuilder};
pub use registry::AuctioneerRegistry;

/// Self-reported applicability of an extension for one step
///
/// Positive means applicable; the magnitude is a confidence only compared by
/// auctioneers that rank bids.
pub type Bid = i32;

/// One of the four sequential derivative evaluations of an RKN4 step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    K1,
    K2,
    K3,
    K4,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::K1, Stage::K2, Stage::K3, Stage::K4];

    pub fn index(self) -> usize {
        match self {
            Stage::K1 => 0,
            Stage::K2 => 1,
            Stage::K3 => 2,
            Stage::K4 => 3,
        }
    }
}

/// Additive changes an extension applies to the advanced state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepUpdate {
    /// Change of the momentum magnitude, GeV
    pub delta_momentum: Scalar,
    /// Elapsed time, mm/c
    pub delta_time: Scalar,
}

impl std::ops::AddAssign for StepUpdate {
    fn add_assign(&mut self, other: Self) {
        self.delta_momentum += other.delta_momentum;
        self.delta_time += other.delta_time;
    }
}

/// A unit of step evaluation managed by an [`ExtensionList`]
///
/// Failures are reported as `None` and never panic: the stepper decides
/// whether to shrink the step or abort.
pub trait StepperExtension: Any + Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Applicability of this extension for a step starting at `state`
    fn bid(&self, state: &StepperState) -> Bid;

    /// Contribution to the stage derivative `stage`
    ///
    /// `field` is the field sample at the evaluation point in curvature
    /// units. For [`Stage::K1`] `h` is zero and `k_prev` is the zero vector;
    /// later stages receive the sub-step length and the previous combined
    /// stage derivative.
    fn k(
        &mut self,
        state: &StepperState,
        stage: Stage,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
    ) -> Option<Vector>;

    /// Updates to momentum and time over a step of length `h`
    fn finalize(
        &mut self,
        _state: &StepperState,
        _h: Scalar,
        _data: &StepData,
    ) -> Option<StepUpdate> {
        Some(StepUpdate::default())
    }

    /// Correction to the free-propagation transport Jacobian of the step
    fn transport(
        &mut self,
        _state: &StepperState,
        _h: Scalar,
        _data: &StepData,
    ) -> Option<Jacobian> {
        Some(Jacobian::zeros())
    }

    /// Get self as Any for typed access
    fn as_any(&self) -> &dyn Any;

    /// Get self as mutable Any for typed access
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
