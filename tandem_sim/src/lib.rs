// tandem_sim/src/lib.rs

use bevy::prelude::*;

// Import the plugins defined within the simulation crate.
use crate::simulation::config::ConfigPlugin;
use crate::simulation::core::simulation_setup::SimulationSetupPlugin;
use crate::simulation::plugins::control::ControlPlugin;
use crate::simulation::plugins::task::TaskPlugin;

// This prelude is for convenience for other files WITHIN the tandem_sim crate.
pub mod prelude;

// This module contains all the simulation-specific logic.
pub mod cli;
pub mod simulation;

/// The main plugin that brings together all the simulation parts.
/// An app adds this one plugin, a `Cli` resource and the `AppState` state.
pub struct TandemSimulationPlugin;

impl Plugin for TandemSimulationPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((
            // Reads the scenario and resolves its actors against the catalog.
            ConfigPlugin,
            // Builds the simulator and controller, and orders the tick.
            SimulationSetupPlugin,
            // Refresh, extract, control, dispatch, step.
            ControlPlugin,
            // Scripted reach / grasp / lift episodes.
            TaskPlugin,
        ));
    }
}
