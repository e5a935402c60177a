// tandem_sim/src/simulation/plugins/task.rs

//! Scripted reach / grasp / lift episodes.
//!
//! A hand-written policy stands in for a learned one: every tick it turns the
//! distance to the current phase goal into a normalized action vector and
//! feeds it through the same action mapping a policy would use.

use nalgebra::{DVector, UnitQuaternion, Vector3};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::prelude::*;
use crate::simulation::config::structs::TaskSettings;
use crate::simulation::config::{ResolvedActors, ScenarioError};
use crate::simulation::core::components::{ArmStates, ArmTargets, LatestSnapshot, Simulator};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::plugins::control::step_simulation;

pub struct TaskPlugin;

impl Plugin for TaskPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<EpisodeRunner>().add_systems(
            Update,
            (
                drive_scripted_policy.in_set(SimulationSet::Targets),
                reset_finished_episodes
                    .in_set(SimulationSet::Step)
                    .after(step_simulation),
            ),
        );
    }
}

// =========================================================================
// == Episode Bookkeeping ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpisodePhase {
    /// Move above the goal with the gripper open.
    #[default]
    Reach,
    /// Hold position and close the gripper.
    Grasp,
    /// Raise the goal by `lift_distance` with the gripper closed.
    Lift,
}

impl EpisodePhase {
    pub fn ticks(self, task: &TaskSettings) -> usize {
        match self {
            EpisodePhase::Reach => task.reach_ticks,
            EpisodePhase::Grasp => task.grasp_ticks,
            EpisodePhase::Lift => task.lift_ticks,
        }
    }

    pub fn next(self) -> Option<EpisodePhase> {
        match self {
            EpisodePhase::Reach => Some(EpisodePhase::Grasp),
            EpisodePhase::Grasp => Some(EpisodePhase::Lift),
            EpisodePhase::Lift => None,
        }
    }

    pub fn gripper_target(self, task: &TaskSettings) -> f64 {
        match self {
            EpisodePhase::Reach => task.gripper_open,
            EpisodePhase::Grasp | EpisodePhase::Lift => task.gripper_closed,
        }
    }
}

/// The pose an arm reaches for in one episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalPose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

#[derive(Resource, Debug, Default)]
pub struct EpisodeRunner {
    /// Number of completed episodes.
    pub episode: usize,
    pub phase: EpisodePhase,
    /// Ticks spent in the current phase.
    pub tick: usize,
    /// `[env][arm]`; empty until the episode's goals are planned.
    goals: Vec<Vec<GoalPose>>,
    reset_pending: bool,
    /// Root states as first observed, restored for props on every reset.
    initial_root_state: Option<Vec<f64>>,
}

impl EpisodeRunner {
    /// Counts one tick. Returns the phase that just finished, if any.
    pub fn advance(&mut self, task: &TaskSettings) -> Option<EpisodePhase> {
        self.tick += 1;
        if self.tick < self.phase.ticks(task) {
            return None;
        }

        let finished = self.phase;
        self.tick = 0;
        match finished.next() {
            Some(next) => self.phase = next,
            None => {
                self.phase = EpisodePhase::Reach;
                self.episode += 1;
                self.reset_pending = true;
            }
        }
        Some(finished)
    }

    /// Where the midpoint of arm `arm` in env `env` should be in the current phase.
    pub fn phase_position(&self, env: usize, arm: usize, task: &TaskSettings) -> Vector3<f64> {
        let goal = self.goals[env][arm].position;
        match self.phase {
            EpisodePhase::Reach | EpisodePhase::Grasp => goal,
            EpisodePhase::Lift => goal + Vector3::z() * task.lift_distance,
        }
    }

    fn tracking_errors(&self, states: &[Vec<ArmState>], task: &TaskSettings) -> Vec<f64> {
        states
            .iter()
            .enumerate()
            .flat_map(|(env, env_states)| {
                env_states.iter().enumerate().map(move |(arm, state)| {
                    (self.phase_position(env, arm, task) - state.fingertip_midpoint.position).norm()
                })
            })
            .collect()
    }
}

// =========================================================================
// == Scripted Policy ==
// =========================================================================

/// Reach goals for a new episode: the current midpoint plus each arm's offset
/// plus isotropic Gaussian noise. Orientation is held.
pub fn plan_goals<R: Rng + ?Sized>(
    states: &[Vec<ArmState>],
    offsets: &[Vector3<f64>],
    noise: f64,
    rng: &mut R,
) -> Result<Vec<Vec<GoalPose>>, ScenarioError> {
    let normal = Normal::new(0.0, noise)
        .map_err(|e| ScenarioError::Invalid(format!("target_noise {noise}: {e}")))?;

    let mut goals = Vec::with_capacity(states.len());
    for env_states in states {
        let mut env_goals = Vec::with_capacity(env_states.len());
        for (state, offset) in env_states.iter().zip(offsets) {
            let midpoint = &state.fingertip_midpoint;
            let jitter = Vector3::new(normal.sample(rng), normal.sample(rng), normal.sample(rng));
            env_goals.push(GoalPose {
                position: midpoint.position + offset + jitter,
                orientation: midpoint.orientation,
            });
        }
        goals.push(env_goals);
    }
    Ok(goals)
}

/// The action a proportional policy takes toward `goal`: each component is
/// the remaining error in units of its action scale, clamped to `[-1, 1]`.
pub fn scripted_action(
    current: &RigidBodyFrame,
    goal_position: &Vector3<f64>,
    goal_orientation: &UnitQuaternion<f64>,
    scales: &ActionScales,
) -> [f64; ACTIONS_PER_ARM] {
    let position_error = goal_position - current.position;
    let rotation_error = (goal_orientation * current.orientation.inverse()).scaled_axis();

    let mut action = [0.0; ACTIONS_PER_ARM];
    for i in 0..3 {
        action[i] = normalized(position_error[i], scales.pos_action_scale[i]);
        action[3 + i] = normalized(rotation_error[i], scales.rot_action_scale[i]);
    }
    action
}

fn normalized(error: f64, scale: f64) -> f64 {
    if scale > 0.0 {
        (error / scale).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// A `(envs * dofs, 2)` DOF-state buffer with every arm at its home pose.
/// Arm joints (not gripper DOFs) get Gaussian noise; velocities are zero.
pub fn reset_dof_state<R: Rng + ?Sized>(
    table: &FrameTable,
    homes: &[&[f64]],
    noise: f64,
    rng: &mut R,
) -> Result<Vec<f64>, ScenarioError> {
    let normal = Normal::new(0.0, noise)
        .map_err(|e| ScenarioError::Invalid(format!("reset_joint_noise {noise}: {e}")))?;
    let topology = table.topology();
    let mut buffer = vec![0.0; topology.num_envs * topology.dofs_per_env() * 2];

    for env in 0..table.num_envs() {
        for (arm, (layout, home)) in table.arms().iter().zip(homes).enumerate() {
            let start = table.global_dof_offset(env, arm);
            for (i, &position) in home.iter().enumerate().take(layout.num_dofs()) {
                let jitter = if i < layout.num_arm_dofs {
                    normal.sample(rng)
                } else {
                    0.0
                };
                buffer[(start + i) * 2] = position + jitter;
            }
        }
    }
    Ok(buffer)
}

/// Global ids of every DOF-less actor.
fn prop_actor_ids(topology: &SceneTopology) -> Vec<usize> {
    (0..topology.num_envs)
        .flat_map(|env| {
            topology
                .actors
                .iter()
                .enumerate()
                .filter(|(_, actor)| actor.num_dofs() == 0)
                .map(move |(index, _)| topology.global_actor_index(env, index))
        })
        .collect()
}

// =========================================================================
// == Systems ==
// =========================================================================

#[allow(clippy::too_many_arguments)]
fn drive_scripted_policy(
    mut runner: ResMut<EpisodeRunner>,
    mut targets: ResMut<ArmTargets>,
    mut rng: ResMut<SimulationRng>,
    states: Res<ArmStates>,
    snapshot: Res<LatestSnapshot>,
    scenario: Res<ScenarioConfig>,
    actors: Res<ResolvedActors>,
    config: Res<ControllerConfig>,
) -> Result {
    let task = &scenario.task;
    if runner.episode >= scenario.simulation.episodes {
        return Ok(());
    }

    // --- 1. Plan goals at the start of each episode ---
    if runner.goals.is_empty() {
        let offsets: Vec<Vector3<f64>> = actors
            .arms()
            .map(|arm| Vector3::from(arm.reach_offset))
            .collect();
        runner.goals = plan_goals(&states.0, &offsets, task.target_noise, &mut rng.0)?;
        if runner.initial_root_state.is_none() {
            runner.initial_root_state = Some(snapshot.0.root_state.data().to_vec());
        }
        targets.0 = states
            .0
            .iter()
            .map(|env_states| env_states.iter().map(ControlTarget::hold).collect())
            .collect();
        info!(
            "[EPISODE {}] Planned goals for {} arm(s)",
            runner.episode + 1,
            runner.goals.iter().map(Vec::len).sum::<usize>()
        );
    }

    // --- 2. Map the scripted actions onto targets ---
    let gripper = runner.phase.gripper_target(task);
    for (env, env_states) in states.0.iter().enumerate() {
        for (arm, state) in env_states.iter().enumerate() {
            let goal_position = runner.phase_position(env, arm, task);
            let goal_orientation = runner.goals[env][arm].orientation;
            let action = scripted_action(
                &state.fingertip_midpoint,
                &goal_position,
                &goal_orientation,
                &task.actions,
            );
            let next = target_from_action(
                state,
                &action,
                DVector::from_element(state.num_gripper_dofs(), gripper),
                &targets.0[env][arm],
                &task.actions,
                &config,
                true,
            );
            targets.0[env][arm] = next;
        }
    }

    // --- 3. Advance the episode clock ---
    let errors = runner.tracking_errors(&states.0, task);
    let episode = runner.episode + 1;
    if let Some(finished) = runner.advance(task) {
        let max = errors.iter().copied().fold(0.0, f64::max);
        let mean = errors.iter().sum::<f64>() / errors.len().max(1) as f64;
        info!(
            "[EPISODE {}] {:?} done: mean tracking error {:.4} m, max {:.4} m",
            episode, finished, mean, max
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reset_finished_episodes(
    mut runner: ResMut<EpisodeRunner>,
    mut simulator: ResMut<Simulator>,
    mut rng: ResMut<SimulationRng>,
    mut exit: EventWriter<AppExit>,
    extractor: Res<KinematicStateExtractor>,
    dispatcher: Res<CommandDispatcher>,
    actors: Res<ResolvedActors>,
    scenario: Res<ScenarioConfig>,
) -> Result {
    if !runner.reset_pending {
        return Ok(());
    }
    runner.reset_pending = false;
    runner.goals.clear();

    // --- 1. Arms back to home, with joint noise ---
    let table = extractor.table();
    let homes: Vec<&[f64]> = actors
        .arms()
        .map(|arm| arm.home_dof_positions.as_slice())
        .collect();
    let dof_state = reset_dof_state(table, &homes, scenario.task.reset_joint_noise, &mut rng.0)?;
    simulator.0.set_dof_state_indexed(&dof_state, dispatcher.actor_ids())?;

    // --- 2. Props back to where they started ---
    let props = prop_actor_ids(table.topology());
    if let Some(root_state) = runner.initial_root_state.as_deref() {
        if !props.is_empty() {
            simulator.0.set_root_state_indexed(root_state, &props)?;
        }
    }

    if runner.episode >= scenario.simulation.episodes {
        info!(
            "All {} episode(s) complete. Exiting.",
            scenario.simulation.episodes
        );
        exit.write(AppExit::Success);
    } else {
        debug!("Reset {} env(s) for episode {}", table.num_envs(), runner.episode + 1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::testbed::backend::tests::dual_arm_scenario;
    use crate::simulation::testbed::KinematicTestbed;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const F64_EPSILON: f64 = 1e-9;

    fn task() -> TaskSettings {
        TaskSettings {
            reach_ticks: 3,
            grasp_ticks: 2,
            lift_ticks: 1,
            ..Default::default()
        }
    }

    fn initial_states() -> (Vec<Vec<ArmState>>, FrameTable) {
        let (scenario, actors) = dual_arm_scenario();
        let mut testbed = KinematicTestbed::new(&scenario, &actors).unwrap();
        let arms: Vec<_> = actors.arms().map(ArmConfig::description).collect();
        let table = FrameTable::build(testbed.topology().clone(), &arms).unwrap();
        let extractor = KinematicStateExtractor::new(table.clone(), &testbed.shapes()).unwrap();
        (extractor.extract(&testbed.refresh().unwrap()).unwrap(), table)
    }

    #[test]
    fn test_phases_cycle_and_flag_a_reset() {
        let task = task();
        let mut runner = EpisodeRunner::default();
        let finished: Vec<_> = (0..6).filter_map(|_| runner.advance(&task)).collect();
        assert_eq!(
            finished,
            vec![EpisodePhase::Reach, EpisodePhase::Grasp, EpisodePhase::Lift]
        );
        assert_eq!(runner.episode, 1);
        assert_eq!(runner.phase, EpisodePhase::Reach);
        assert!(runner.reset_pending);
    }

    #[test]
    fn test_gripper_closes_after_reach() {
        let task = task();
        assert_eq!(EpisodePhase::Reach.gripper_target(&task), task.gripper_open);
        assert_eq!(EpisodePhase::Grasp.gripper_target(&task), task.gripper_closed);
        assert_eq!(EpisodePhase::Lift.gripper_target(&task), task.gripper_closed);
    }

    #[test]
    fn test_noise_free_goals_are_offset_midpoints() {
        let (states, _) = initial_states();
        let offsets = [Vector3::new(0.05, 0.0, -0.1), Vector3::new(0.0, 0.02, 0.0)];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let goals = plan_goals(&states, &offsets, 0.0, &mut rng).unwrap();

        assert_eq!(goals.len(), states.len());
        for (env_goals, env_states) in goals.iter().zip(&states) {
            for ((goal, state), offset) in env_goals.iter().zip(env_states).zip(&offsets) {
                let expected = state.fingertip_midpoint.position + offset;
                assert_abs_diff_eq!(goal.position, expected, epsilon = F64_EPSILON);
                assert_eq!(goal.orientation, state.fingertip_midpoint.orientation);
            }
        }
    }

    #[test]
    fn test_negative_noise_is_rejected() {
        let (states, _) = initial_states();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(plan_goals(&states, &[Vector3::zeros(); 2], -1.0, &mut rng).is_err());
    }

    #[test]
    fn test_lift_raises_the_goal() {
        let task = task();
        let goal = GoalPose {
            position: Vector3::new(0.5, 0.0, 0.4),
            orientation: UnitQuaternion::identity(),
        };
        let mut runner = EpisodeRunner {
            goals: vec![vec![goal]],
            ..Default::default()
        };
        assert_abs_diff_eq!(
            runner.phase_position(0, 0, &task),
            goal.position,
            epsilon = F64_EPSILON
        );
        runner.phase = EpisodePhase::Lift;
        assert_abs_diff_eq!(
            runner.phase_position(0, 0, &task).z,
            0.4 + task.lift_distance,
            epsilon = F64_EPSILON
        );
    }

    #[test]
    fn test_scripted_action_is_normalized_and_clamped() {
        let scales = ActionScales {
            pos_action_scale: [0.02; 3],
            ..Default::default()
        };
        let current =
            RigidBodyFrame::at_rest(Vector3::new(0.5, 0.0, 0.5), UnitQuaternion::identity());
        let action = scripted_action(
            &current,
            &Vector3::new(0.51, 0.0, 0.3),
            &UnitQuaternion::from_euler_angles(0.0, 0.0, 0.01),
            &scales,
        );
        assert_abs_diff_eq!(action[0], 0.5, epsilon = F64_EPSILON);
        assert_abs_diff_eq!(action[1], 0.0, epsilon = F64_EPSILON);
        assert_abs_diff_eq!(action[2], -1.0, epsilon = F64_EPSILON);
        // 0.01 rad against the default 0.1 rad scale.
        assert_abs_diff_eq!(action[5], 0.1, epsilon = 1e-6);
        assert!(action[6..].iter().all(|&a| a == 0.0));
    }

    #[test]
    fn test_reset_buffer_puts_home_at_each_arm_offset() {
        let (_, table) = initial_states();
        let (_, actors) = dual_arm_scenario();
        let homes: Vec<&[f64]> = actors
            .arms()
            .map(|arm| arm.home_dof_positions.as_slice())
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let buffer = reset_dof_state(&table, &homes, 0.0, &mut rng).unwrap();

        assert_eq!(buffer.len(), table.num_envs() * table.topology().dofs_per_env() * 2);
        for env in 0..table.num_envs() {
            for (arm, home) in homes.iter().enumerate() {
                let start = table.global_dof_offset(env, arm);
                for (i, &position) in home.iter().enumerate() {
                    assert_eq!(buffer[(start + i) * 2], position);
                    assert_eq!(buffer[(start + i) * 2 + 1], 0.0);
                }
            }
        }
    }

    #[test]
    fn test_reset_noise_spares_the_gripper() {
        let (_, table) = initial_states();
        let (_, actors) = dual_arm_scenario();
        let homes: Vec<&[f64]> = actors
            .arms()
            .map(|arm| arm.home_dof_positions.as_slice())
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let buffer = reset_dof_state(&table, &homes, 0.05, &mut rng).unwrap();

        let start = table.global_dof_offset(0, 0);
        assert!((0..7).any(|i| buffer[(start + i) * 2] != homes[0][i]));
        assert_eq!(buffer[(start + 7) * 2], homes[0][7]);
        assert_eq!(buffer[(start + 8) * 2], homes[0][8]);
    }

    #[test]
    fn test_prop_ids_skip_arms() {
        let (_, table) = initial_states();
        // Actors per env: franka_0, nut, franka_1, bolt.
        assert_eq!(prop_actor_ids(table.topology()), vec![1, 3, 5, 7]);
    }
}
