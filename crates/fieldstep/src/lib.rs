//! fieldstep library
//!
//! Runge-Kutta-Nyström propagation of charged particles through magnetic
//! fields and material, with the physics of each step supplied by a list of
//! arbitrated extensions.

pub mod cli;
pub mod config;
pub mod physics;
pub mod prelude;
