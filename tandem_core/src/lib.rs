// tandem_core/src/lib.rs

// This file defines the public modules of the library.
pub mod actions;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod frames;
pub mod kinematics;
pub mod prelude;
pub mod simulator;
pub mod types;
pub mod utils;
