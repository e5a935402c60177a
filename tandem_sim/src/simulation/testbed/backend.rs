// tandem_sim/src/simulation/testbed/backend.rs

use std::collections::BTreeMap;

use bevy::log::info;
use nalgebra::{DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use tandem_core::error::{ControlError, ControlResult};
use tandem_core::frames::layout::SceneTopology;
use tandem_core::frames::RigidBodyFrame;
use tandem_core::simulator::{
    DofDriveProperties, DriveMode, SimSnapshot, SimulationBackend, SnapshotShapes, Tensor,
};
use tandem_core::types::{BODY_STATE_WIDTH, CONTACT_FORCE_WIDTH, DOF_STATE_WIDTH, TASK_DIM};

use super::chain::ArticulatedChain;
use crate::simulation::config::structs::{ActorConfig, PropConfig, ScenarioConfig, WorldSettings};
use crate::simulation::config::{ResolvedActors, ScenarioError};

enum ActorModel {
    Arm(ArticulatedChain),
    Prop(PropConfig),
}

/// Per-environment state of one arm actor.
#[derive(Debug, Clone)]
struct ArmInstance {
    base: Isometry3<f64>,
    q: DVector<f64>,
    qd: DVector<f64>,
    position_targets: DVector<f64>,
    efforts: DVector<f64>,
    /// Drive forces applied during the last substep.
    applied: DVector<f64>,
    drives: Vec<DofDriveProperties>,
    /// Net table contact force on every body during the last substep.
    contact: Vec<Vector3<f64>>,
}

enum ActorInstance {
    Arm(ArmInstance),
    Prop(RigidBodyFrame),
}

// =========================================================================
// == Kinematic Testbed ==
// =========================================================================

/// An in-process stand-in for a batched GPU simulator.
///
/// Arms are gravity-compensated serial chains integrated with semi-implicit
/// Euler; props fall onto the table plane and stop there. Every environment
/// repeats the scenario's actor list, shifted along x by `env_spacing`.
pub struct KinematicTestbed {
    topology: SceneTopology,
    models: Vec<ActorModel>,
    /// `[env][actor]`
    envs: Vec<Vec<ActorInstance>>,
    world: WorldSettings,
    gravity: Vector3<f64>,
    dt: f64,
    substeps: usize,
}

impl KinematicTestbed {
    pub fn new(scenario: &ScenarioConfig, actors: &ResolvedActors) -> Result<Self, ScenarioError> {
        let settings = &scenario.simulation;
        if settings.num_envs == 0 || settings.substeps == 0 || settings.dt <= 0.0 {
            return Err(ScenarioError::Invalid(
                "simulation needs at least one env, one substep and a positive dt".to_string(),
            ));
        }

        let models = actors
            .0
            .iter()
            .map(|actor| match actor {
                ActorConfig::Arm(arm) => ArticulatedChain::from_config(arm).map(ActorModel::Arm),
                ActorConfig::Prop(prop) => Ok(ActorModel::Prop(prop.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let envs = (0..settings.num_envs)
            .map(|env| {
                let origin = Vector3::new(env as f64 * settings.env_spacing, 0.0, 0.0);
                actors
                    .0
                    .iter()
                    .map(|config| initial_instance(config, &origin))
                    .collect()
            })
            .collect();

        let topology = actors.topology(settings.num_envs);
        info!(
            "[TESTBED] {} env(s), {} actor(s), {} DOF(s) per env, dt = {:.4}s x {} substep(s)",
            topology.num_envs,
            topology.actors_per_env(),
            topology.dofs_per_env(),
            settings.dt,
            settings.substeps
        );

        Ok(Self {
            topology,
            models,
            envs,
            world: scenario.world.clone(),
            gravity: Vector3::from(scenario.world.gravity),
            dt: settings.dt,
            substeps: settings.substeps,
        })
    }

    /// `(env, actor_index)` of a global actor id.
    fn locate(&self, actor_id: usize) -> ControlResult<(usize, usize)> {
        let per_env = self.topology.actors_per_env();
        let env = actor_id / per_env;
        if env >= self.topology.num_envs {
            return Err(ControlError::Simulator(format!(
                "actor id {actor_id} is out of range"
            )));
        }
        Ok((env, actor_id % per_env))
    }

    /// Applies the per-DOF slice of `data` belonging to each listed arm.
    fn write_indexed_dofs(
        &mut self,
        tensor: &str,
        data: &[f64],
        width: usize,
        actor_ids: &[usize],
        mut apply: impl FnMut(&mut ArmInstance, &[f64]),
    ) -> ControlResult<()> {
        let dofs_per_env = self.topology.dofs_per_env();
        check_len(tensor, data.len(), self.topology.num_envs * dofs_per_env * width)?;
        for &id in actor_ids {
            let (env, actor) = self.locate(id)?;
            let start = (env * dofs_per_env + self.topology.dof_offset(actor)) * width;
            if let ActorInstance::Arm(arm) = &mut self.envs[env][actor] {
                let end = start + arm.q.len() * width;
                apply(arm, &data[start..end]);
            }
        }
        Ok(())
    }
}

fn initial_instance(config: &ActorConfig, origin: &Vector3<f64>) -> ActorInstance {
    match config {
        ActorConfig::Arm(arm) => {
            let n = arm.home_dof_positions.len();
            let home = DVector::from_column_slice(&arm.home_dof_positions);
            ActorInstance::Arm(ArmInstance {
                base: Translation3::from(*origin) * arm.base_pose(),
                q: home.clone(),
                qd: DVector::zeros(n),
                position_targets: home,
                efforts: DVector::zeros(n),
                applied: DVector::zeros(n),
                drives: vec![
                    DofDriveProperties {
                        mode: DriveMode::Effort,
                        stiffness: 0.0,
                        damping: 0.0,
                    };
                    n
                ],
                contact: vec![Vector3::zeros(); arm.links.len()],
            })
        }
        ActorConfig::Prop(prop) => ActorInstance::Prop(RigidBodyFrame::at_rest(
            origin + Vector3::from(prop.position),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), prop.yaw),
        )),
    }
}

fn check_len(tensor: &str, actual: usize, expected: usize) -> ControlResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ControlError::ShapeMismatch {
            tensor: tensor.to_string(),
            expected: vec![expected],
            actual: vec![actual],
        })
    }
}

// =========================================================================
// == Dynamics ==
// =========================================================================

fn step_arm(
    chain: &ArticulatedChain,
    arm: &mut ArmInstance,
    world: &WorldSettings,
    h: f64,
) -> ControlResult<()> {
    let pose = chain.pose(&arm.base, &arm.q);
    let mass = chain.mass_matrix(&pose);

    // --- 1. Drives ---
    let drive = DVector::from_fn(chain.num_dofs(), |i, _| {
        let properties = arm.drives[i];
        match properties.mode {
            DriveMode::Position => {
                properties.stiffness * (arm.position_targets[i] - arm.q[i])
                    - properties.damping * arm.qd[i]
            }
            DriveMode::Effort => arm.efforts[i],
        }
    });
    let mut generalized = &drive - &arm.qd * chain.friction();

    // --- 2. Table Contact ---
    for force in arm.contact.iter_mut() {
        *force = Vector3::zeros();
    }
    for point in chain.contact_points() {
        let world_point = pose.bodies[point.body]
            .transform_point(&Point3::from(point.offset))
            .coords;
        let penetration = world.table_height - world_point.z;
        if penetration <= 0.0 {
            continue;
        }
        let jacobian = chain.point_jacobian(&pose, point.body, &world_point);
        let normal_axis = jacobian.row(2).transpose();
        let velocity = normal_axis.dot(&arm.qd);
        let normal =
            (world.contact_stiffness * penetration - world.contact_damping * velocity).max(0.0);
        generalized += normal_axis * normal;
        arm.contact[point.body].z += normal;
    }

    // --- 3. Integrate ---
    let acceleration = mass
        .cholesky()
        .ok_or_else(|| {
            ControlError::Simulator("testbed mass matrix is not positive definite".to_string())
        })?
        .solve(&generalized);
    arm.qd += acceleration * h;
    arm.q += &arm.qd * h;
    chain.enforce_limits(&mut arm.q, &mut arm.qd);
    arm.applied = drive;
    Ok(())
}

fn step_prop(
    prop: &PropConfig,
    frame: &mut RigidBodyFrame,
    gravity: &Vector3<f64>,
    table_height: f64,
    h: f64,
) {
    frame.linear_velocity += gravity * h;
    frame.position += frame.linear_velocity * h;
    let floor = table_height + prop.rest_height;
    if frame.position.z <= floor {
        frame.position.z = floor;
        frame.linear_velocity = Vector3::zeros();
        frame.angular_velocity = Vector3::zeros();
    }
}

// =========================================================================
// == Simulator Contract ==
// =========================================================================

impl SimulationBackend for KinematicTestbed {
    fn topology(&self) -> &SceneTopology {
        &self.topology
    }

    fn shapes(&self) -> SnapshotShapes {
        SnapshotShapes::for_topology(&self.topology)
    }

    fn refresh(&mut self) -> ControlResult<SimSnapshot> {
        let topology = &self.topology;
        let num_envs = topology.num_envs;
        let bodies_per_env = topology.bodies_per_env();
        let dofs_per_env = topology.dofs_per_env();

        let mut root_state =
            Tensor::zeros(&[num_envs * topology.actors_per_env(), BODY_STATE_WIDTH]);
        let mut body_state = Tensor::zeros(&[num_envs * bodies_per_env, BODY_STATE_WIDTH]);
        let mut dof_state = Tensor::zeros(&[num_envs * dofs_per_env, DOF_STATE_WIDTH]);
        let mut dof_force = Tensor::zeros(&[num_envs * dofs_per_env]);
        let mut net_contact_force =
            Tensor::zeros(&[num_envs * bodies_per_env, CONTACT_FORCE_WIDTH]);
        let mut jacobians = BTreeMap::new();
        let mut mass_matrices = BTreeMap::new();

        for (env, instances) in self.envs.iter().enumerate() {
            for (actor, (model, instance)) in self.models.iter().zip(instances).enumerate() {
                let body_base = env * bodies_per_env + topology.body_offset(actor);
                let root_row = topology.global_actor_index(env, actor);

                match (model, instance) {
                    (ActorModel::Arm(chain), ActorInstance::Arm(arm)) => {
                        let base =
                            RigidBodyFrame::at_rest(arm.base.translation.vector, arm.base.rotation);
                        root_state.row_mut(root_row).copy_from_slice(&base.to_state_row());

                        let name = topology.actors[actor].name.clone();
                        let (num_bodies, num_dofs) = (chain.num_bodies(), chain.num_dofs());
                        let jacobian_tensor = jacobians
                            .entry(name.clone())
                            .or_insert_with(|| {
                                Tensor::zeros(&[num_envs, num_bodies - 1, TASK_DIM, num_dofs])
                            });
                        let pose = chain.pose(&arm.base, &arm.q);

                        for body in 0..num_bodies {
                            let jacobian = chain.body_jacobian(&pose, body);
                            let twist = &jacobian * &arm.qd;
                            let iso = pose.bodies[body];
                            let frame = RigidBodyFrame {
                                position: iso.translation.vector,
                                orientation: iso.rotation,
                                linear_velocity: Vector3::new(twist[0], twist[1], twist[2]),
                                angular_velocity: Vector3::new(twist[3], twist[4], twist[5]),
                            };
                            body_state
                                .row_mut(body_base + body)
                                .copy_from_slice(&frame.to_state_row());
                            net_contact_force
                                .row_mut(body_base + body)
                                .copy_from_slice(arm.contact[body].as_slice());

                            // The fixed base has no Jacobian row.
                            if body > 0 {
                                let block = jacobian_tensor.row_mut(env);
                                let offset = (body - 1) * TASK_DIM * num_dofs;
                                for r in 0..TASK_DIM {
                                    for c in 0..num_dofs {
                                        block[offset + r * num_dofs + c] = jacobian[(r, c)];
                                    }
                                }
                            }
                        }

                        let mass = chain.mass_matrix(&pose);
                        let mass_tensor = mass_matrices
                            .entry(name)
                            .or_insert_with(|| Tensor::zeros(&[num_envs, num_dofs, num_dofs]));
                        let block = mass_tensor.row_mut(env);
                        for r in 0..num_dofs {
                            for c in 0..num_dofs {
                                block[r * num_dofs + c] = mass[(r, c)];
                            }
                        }

                        let dof_base = env * dofs_per_env + topology.dof_offset(actor);
                        for i in 0..num_dofs {
                            dof_state.row_mut(dof_base + i).copy_from_slice(&[arm.q[i], arm.qd[i]]);
                            dof_force.data_mut()[dof_base + i] = arm.applied[i];
                        }
                    }
                    (ActorModel::Prop(_), ActorInstance::Prop(frame)) => {
                        let row = frame.to_state_row();
                        root_state.row_mut(root_row).copy_from_slice(&row);
                        body_state.row_mut(body_base).copy_from_slice(&row);
                    }
                    _ => {}
                }
            }
        }

        Ok(SimSnapshot {
            root_state,
            body_state,
            dof_state,
            dof_force,
            net_contact_force,
            jacobians,
            mass_matrices,
        })
    }

    fn set_dof_drive_properties(
        &mut self,
        env: usize,
        actor_index: usize,
        properties: &[DofDriveProperties],
    ) -> ControlResult<()> {
        if env >= self.topology.num_envs || actor_index >= self.topology.actors_per_env() {
            return Err(ControlError::Simulator(format!(
                "no actor {actor_index} in env {env}"
            )));
        }
        match &mut self.envs[env][actor_index] {
            ActorInstance::Arm(arm) => {
                check_len("dof_drive_properties", properties.len(), arm.drives.len())?;
                arm.drives.copy_from_slice(properties);
            }
            ActorInstance::Prop(_) => check_len("dof_drive_properties", properties.len(), 0)?,
        }
        Ok(())
    }

    fn set_dof_position_targets_indexed(
        &mut self,
        targets: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()> {
        self.write_indexed_dofs("dof_position_targets", targets, 1, actor_ids, |arm, slice| {
            arm.position_targets.copy_from_slice(slice)
        })
    }

    fn set_dof_actuation_forces_indexed(
        &mut self,
        forces: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()> {
        self.write_indexed_dofs("dof_actuation_forces", forces, 1, actor_ids, |arm, slice| {
            arm.efforts.copy_from_slice(slice)
        })
    }

    fn set_dof_state_indexed(
        &mut self,
        dof_state: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()> {
        self.write_indexed_dofs("dof_state", dof_state, DOF_STATE_WIDTH, actor_ids, |arm, slice| {
            for (i, row) in slice.chunks_exact(DOF_STATE_WIDTH).enumerate() {
                arm.q[i] = row[0];
                arm.qd[i] = row[1];
            }
        })
    }

    fn set_root_state_indexed(
        &mut self,
        root_state: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()> {
        let num_actors = self.topology.num_envs * self.topology.actors_per_env();
        check_len("root_state", root_state.len(), num_actors * BODY_STATE_WIDTH)?;
        for &id in actor_ids {
            let (env, actor) = self.locate(id)?;
            let row = &root_state[id * BODY_STATE_WIDTH..(id + 1) * BODY_STATE_WIDTH];
            let frame = RigidBodyFrame::from_state_row(row);
            match &mut self.envs[env][actor] {
                ActorInstance::Arm(arm) => {
                    let translation = Translation3::from(frame.position);
                    arm.base = Isometry3::from_parts(translation, frame.orientation);
                }
                ActorInstance::Prop(prop) => *prop = frame,
            }
        }
        Ok(())
    }

    fn set_gravity(&mut self, gravity: Vector3<f64>) {
        self.gravity = gravity;
    }

    fn simulate(&mut self) -> ControlResult<()> {
        let h = self.dt / self.substeps as f64;
        for _ in 0..self.substeps {
            for instances in self.envs.iter_mut() {
                for (model, instance) in self.models.iter().zip(instances.iter_mut()) {
                    match (model, instance) {
                        (ActorModel::Arm(chain), ActorInstance::Arm(arm)) => {
                            step_arm(chain, arm, &self.world, h)?
                        }
                        (ActorModel::Prop(prop), ActorInstance::Prop(frame)) => {
                            step_prop(prop, frame, &self.gravity, self.world.table_height, h)
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}
