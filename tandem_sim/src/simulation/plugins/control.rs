// tandem_sim/src/simulation/plugins/control.rs

//! The per-tick control loop: refresh, extract, compute, dispatch, step.

use crate::prelude::*;
use crate::simulation::core::components::{
    ArmCommands, ArmStates, ArmTargets, LatestSnapshot, Simulator,
};

pub struct ControlPlugin;

impl Plugin for ControlPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            (
                refresh_snapshot.in_set(SimulationSet::Refresh),
                extract_arm_states.in_set(SimulationSet::Extract),
                compute_arm_commands.in_set(SimulationSet::Control),
                dispatch_arm_commands.in_set(SimulationSet::Dispatch),
                step_simulation.in_set(SimulationSet::Step),
            ),
        );
    }
}

fn refresh_snapshot(
    mut simulator: ResMut<Simulator>,
    mut snapshot: ResMut<LatestSnapshot>,
) -> Result {
    snapshot.0 = simulator.0.refresh()?;
    Ok(())
}

fn extract_arm_states(
    extractor: Res<KinematicStateExtractor>,
    snapshot: Res<LatestSnapshot>,
    mut states: ResMut<ArmStates>,
) -> Result {
    states.0 = extractor.extract(&snapshot.0)?;
    Ok(())
}

/// Runs the control law for every arm. An arm without a target holds its
/// current pose.
fn compute_arm_commands(
    config: Res<ControllerConfig>,
    states: Res<ArmStates>,
    targets: Res<ArmTargets>,
    mut commands: ResMut<ArmCommands>,
) {
    commands.0 = states
        .0
        .iter()
        .enumerate()
        .map(|(env, env_states)| {
            env_states
                .iter()
                .enumerate()
                .map(|(arm, state)| {
                    match targets.0.get(env).and_then(|t| t.get(arm)) {
                        Some(target) => compute_control_signals(state, target, &config),
                        None => {
                            compute_control_signals(state, &ControlTarget::hold(state), &config)
                        }
                    }
                })
                .collect()
        })
        .collect();
}

fn dispatch_arm_commands(
    mut dispatcher: ResMut<CommandDispatcher>,
    mut simulator: ResMut<Simulator>,
    commands: Res<ArmCommands>,
) -> Result {
    dispatcher.dispatch(simulator.0.as_mut(), &commands.0)?;
    Ok(())
}

/// Advances the physics by one control tick.
pub fn step_simulation(mut simulator: ResMut<Simulator>) -> Result {
    simulator.0.simulate()?;
    Ok(())
}
