//! fieldstep prelude module
//!
//! Re-exports the types needed to set up and run a propagation.

// Internal re-exports - Config
pub use crate::config::{ConfigError, FieldstepConfig, StepperConfig};

// Internal re-exports - Math
pub use crate::physics::math::{Covariance, FIELD_TO_CURVATURE, Jacobian, Scalar, Vector};

// Internal re-exports - Arbitration
pub use crate::physics::extensions::{
    Auctioneer, AuctioneerRegistry, Bid, CompositionError, DenseEnvironmentExtension,
    ExtensionList, FieldExtension, FirstAcceptableAuctioneer, HighestBidAuctioneer,
    PermissiveAuctioneer, Stage, StepUpdate, StepperExtension,
};

// Internal re-exports - Propagation
pub use crate::physics::field::{ConstantField, MagneticField};
pub use crate::physics::material::{Material, MaterialBox, MaterialMap, NoMaterial};
pub use crate::physics::propagator::{
    PropagationResult, Propagator, PropagatorOptions, StepRecord,
};
pub use crate::physics::state::{StepData, StepperState};
pub use crate::physics::stepper::{PropagationError, RknStepper, StepOutcome};
