// tandem_sim/src/simulation/testbed/mod.rs

//! A small articulated-body simulator that publishes the same tensors a GPU
//! physics engine would. It is what the headless app and the tests run on.

pub mod backend;
pub mod chain;

pub use backend::KinematicTestbed;
