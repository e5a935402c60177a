// tandem_sim/src/simulation/core/simulation_setup.rs

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::prelude::*;
use crate::simulation::config::{ResolvedActors, ScenarioError};
use crate::simulation::core::components::{
    ArmCommands, ArmStates, ArmTargets, LatestSnapshot, Simulator,
};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::testbed::KinematicTestbed;

pub struct SimulationSetupPlugin;

impl Plugin for SimulationSetupPlugin {
    fn build(&self, app: &mut App) {
        // --- INITIALIZE RESOURCES ---
        // These are rewritten every tick; they only need to exist up front.
        app.init_resource::<LatestSnapshot>()
            .init_resource::<ArmStates>()
            .init_resource::<ArmTargets>()
            .init_resource::<ArmCommands>();

        // --- CONFIGURE THE BUILD PIPELINE ---
        // This chain of SystemSets guarantees the simulator exists before the
        // controller validates against it.
        app.configure_sets(
            OnEnter(AppState::SceneBuilding),
            (
                SceneBuildSet::Simulator,
                SceneBuildSet::Controller,
                SceneBuildSet::Finalize,
            )
                .chain(),
        );

        app.add_systems(
            OnEnter(AppState::SceneBuilding),
            (
                (seed_simulation_rng, build_simulator).in_set(SceneBuildSet::Simulator),
                build_controller.in_set(SceneBuildSet::Controller),
                (configure_drives, transition_to_running)
                    .chain()
                    .in_set(SceneBuildSet::Finalize),
            ),
        );

        // Configure the runtime schedule graph. One pass is one control tick,
        // so exactly one dispatch and one physics step happen per frame.
        app.configure_sets(
            Update,
            (
                SimulationSet::Refresh,
                SimulationSet::Extract,
                SimulationSet::Targets,
                SimulationSet::Control,
                SimulationSet::Dispatch,
                SimulationSet::Step,
            )
                .chain() // .chain() enforces the order of the sets
                .run_if(in_state(AppState::Running)),
        );
    }
}

/// Validates the controller section against the resolved arms.
///
/// All arms share one configuration, so they must agree on their DOF split.
pub fn controller_config(
    scenario: &ScenarioConfig,
    actors: &ResolvedActors,
) -> Result<ControllerConfig, ScenarioError> {
    let mut arms = actors.arms();
    let first = arms
        .next()
        .ok_or_else(|| ScenarioError::Invalid("scenario contains no arms".to_string()))?;
    if let Some(other) = arms.find(|a| {
        a.num_arm_dofs != first.num_arm_dofs || a.num_gripper_dofs != first.num_gripper_dofs
    }) {
        return Err(ScenarioError::Invalid(format!(
            "arms '{}' and '{}' have different DOF layouts but share one controller",
            first.name, other.name
        )));
    }

    Ok(scenario
        .controller
        .to_config(first.num_arm_dofs, first.num_gripper_dofs)?)
}

fn seed_simulation_rng(mut commands: Commands, scenario: Res<ScenarioConfig>) {
    let rng = match scenario.simulation.seed {
        Some(seed) => {
            info!("Seeding the simulation RNG with {}", seed);
            ChaCha8Rng::seed_from_u64(seed)
        }
        None => ChaCha8Rng::from_entropy(),
    };
    commands.insert_resource(SimulationRng(rng));
}

fn build_simulator(
    mut commands: Commands,
    scenario: Res<ScenarioConfig>,
    actors: Res<ResolvedActors>,
) -> Result {
    let testbed = KinematicTestbed::new(&scenario, &actors)?;
    commands.insert_resource(Simulator(Box::new(testbed)));
    Ok(())
}

fn build_controller(
    mut commands: Commands,
    scenario: Res<ScenarioConfig>,
    actors: Res<ResolvedActors>,
    simulator: Res<Simulator>,
) -> Result {
    let arms: Vec<ArmDescription> = actors.arms().map(ArmConfig::description).collect();
    let table = FrameTable::build(simulator.0.topology().clone(), &arms)?;
    let extractor = KinematicStateExtractor::new(table.clone(), &simulator.0.shapes())?;
    let config = controller_config(&scenario, &actors)?;

    info!(
        "[CONTROL] {} arm(s) in {} env(s) under '{}'",
        table.arms().len(),
        table.num_envs(),
        config.kind()
    );
    commands.insert_resource(CommandDispatcher::new(&table));
    commands.insert_resource(extractor);
    commands.insert_resource(config);
    Ok(())
}

fn configure_drives(
    mut simulator: ResMut<Simulator>,
    extractor: Res<KinematicStateExtractor>,
    config: Res<ControllerConfig>,
) -> Result {
    configure_arm_drives(simulator.0.as_mut(), extractor.table(), &config)?;
    Ok(())
}

/// This simple system runs once at the end of the `OnEnter(SceneBuilding)` chain.
/// Its only job is to move the app into the main `Running` state.
fn transition_to_running(mut next_state: ResMut<NextState<AppState>>) {
    info!("Scene building complete. Transitioning to Running state.");
    next_state.set(AppState::Running);
}
