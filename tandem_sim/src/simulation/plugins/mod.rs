// tandem_sim/src/simulation/plugins/mod.rs

pub mod control;
pub mod task;
