// tandem_sim/src/prelude.rs

// Re-export the entire Bevy prelude for convenience.
pub use bevy::prelude::*;

// Re-export the entire tandem_core prelude so you can easily access
// pure types like `ArmState`, `ControllerConfig`, `SimulationBackend`, etc.
pub use tandem_core::prelude::*;

// Re-export common simulation-specific types for easy access in other plugins.
pub use crate::simulation::config::structs::*;
pub use crate::simulation::config::ResolvedActors;
pub use crate::simulation::core::app_state::{AppState, SceneBuildSet, SimulationSet};
