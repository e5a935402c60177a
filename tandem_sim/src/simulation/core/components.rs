// tandem_sim/src/simulation/core/components.rs

use bevy::prelude::Resource;
use tandem_core::prelude::{ArmCommand, ArmState, ControlTarget, SimSnapshot, SimulationBackend};

// --- Wrapper Resources for Core Types ---

/// A Bevy resource that wraps the pure `SimulationBackend` trait object.
/// Every system that talks to the physics goes through this.
#[derive(Resource)]
pub struct Simulator(pub Box<dyn SimulationBackend>);

/// The tensors refreshed at the start of the current tick.
#[derive(Resource, Default)]
pub struct LatestSnapshot(pub SimSnapshot);

/// `[env][arm]` kinematic states for the current tick.
#[derive(Resource, Default)]
pub struct ArmStates(pub Vec<Vec<ArmState>>);

/// `[env][arm]` targets the control law tracks. Written by the task layer.
#[derive(Resource, Default)]
pub struct ArmTargets(pub Vec<Vec<ControlTarget>>);

/// `[env][arm]` commands computed this tick, waiting for dispatch.
#[derive(Resource, Default)]
pub struct ArmCommands(pub Vec<Vec<ArmCommand>>);
