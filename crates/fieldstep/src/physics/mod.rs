pub mod extensions;
pub mod field;
pub mod material;
pub mod math;
pub mod propagator;
pub mod state;
pub mod stepper;
