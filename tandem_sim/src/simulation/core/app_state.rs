// tandem_sim/src/simulation/core/app_state.rs

use bevy::{ecs::schedule::SystemSet, prelude::States};

/// Defines the major phases of the application's lifecycle.
#[derive(States, Debug, Clone, Eq, PartialEq, Hash, Default)]
pub enum AppState {
    /// The initial state. The catalog and scenario are read from disk here.
    #[default]
    AssetLoading,

    /// Configuration is resolved. We are now building the testbed and the
    /// controller resources from it.
    SceneBuilding,

    /// The scene is built. The control loop is now running.
    Running,
}

/// System sets to control the order of execution during the SceneBuilding state.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SceneBuildSet {
    /// Pass 1: Create the simulator from the resolved actors.
    Simulator,

    /// Pass 2: Resolve named frames and validate the controller against the
    /// simulator's published tensors.
    Controller,

    /// Pass 3: Push drive settings and anything else that must happen once
    /// before the first tick.
    Finalize,
}

// =========================================================================
// == Main Simulation Sets (The "Data Flow Graph") ==
// =========================================================================

/// One pass through these sets is one control tick.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulationSet {
    /// Pull fresh state tensors out of the simulator. Runs first.
    Refresh,
    /// Turn the snapshot into per-arm kinematic states.
    Extract,
    /// Decide what every arm should be doing (scripted policy, episodes).
    Targets,
    /// Evaluate the control law for every arm.
    Control,
    /// Write all commands to the simulator in one batch.
    Dispatch,
    /// Advance the physics, then apply any resets. Runs last.
    Step,
}
