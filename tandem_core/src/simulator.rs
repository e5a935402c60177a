// tandem_core/src/simulator.rs

//! The contract between the controller and the physics engine.
//!
//! The engine publishes flattened, batched state tensors once per tick and
//! accepts indexed writes. Everything here is expressed in those terms so a
//! GPU tensor simulator and the in-process testbed are interchangeable.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::frames::layout::SceneTopology;
use crate::types::{BODY_STATE_WIDTH, CONTACT_FORCE_WIDTH, DOF_STATE_WIDTH, TASK_DIM};

// =========================================================================
// == Tensors ==
// =========================================================================

/// A dense, row-major `f64` tensor with an explicit shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> ControlResult<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ControlError::ShapeMismatch {
                tensor: "tensor data".to_string(),
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Number of floats spanned by one index of the leading dimension.
    pub fn row_stride(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// The `index`-th slice along the leading dimension.
    pub fn row(&self, index: usize) -> &[f64] {
        let stride = self.row_stride();
        &self.data[index * stride..(index + 1) * stride]
    }

    pub fn row_mut(&mut self, index: usize) -> &mut [f64] {
        let stride = self.row_stride();
        &mut self.data[index * stride..(index + 1) * stride]
    }

    /// Fails with a [`ControlError::ShapeMismatch`] naming `tensor` unless the
    /// shape equals `expected`.
    pub fn check_shape(&self, tensor: &str, expected: &[usize]) -> ControlResult<()> {
        check_shape(tensor, expected, &self.shape)
    }
}

pub(crate) fn check_shape(tensor: &str, expected: &[usize], actual: &[usize]) -> ControlResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ControlError::ShapeMismatch {
            tensor: tensor.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

// =========================================================================
// == Snapshots ==
// =========================================================================

/// One synchronized set of state tensors, as refreshed after a physics step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimSnapshot {
    /// `(envs * actors, 13)`
    pub root_state: Tensor,
    /// `(envs * bodies, 13)`
    pub body_state: Tensor,
    /// `(envs * dofs, 2)`: position, velocity
    pub dof_state: Tensor,
    /// `(envs * dofs)`: actuation force applied during the last step
    pub dof_force: Tensor,
    /// `(envs * bodies, 3)`
    pub net_contact_force: Tensor,
    /// Per articulated actor: `(envs, actor_bodies - 1, 6, actor_dofs)`
    pub jacobians: BTreeMap<String, Tensor>,
    /// Per articulated actor: `(envs, actor_dofs, actor_dofs)`
    pub mass_matrices: BTreeMap<String, Tensor>,
}

/// The shapes of every tensor in a [`SimSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotShapes {
    pub root_state: Vec<usize>,
    pub body_state: Vec<usize>,
    pub dof_state: Vec<usize>,
    pub dof_force: Vec<usize>,
    pub net_contact_force: Vec<usize>,
    pub jacobians: BTreeMap<String, Vec<usize>>,
    pub mass_matrices: BTreeMap<String, Vec<usize>>,
}

impl SnapshotShapes {
    /// The shapes a simulator must publish for `topology`. Jacobians and mass
    /// matrices are expected for every actor that has DOFs.
    pub fn for_topology(topology: &SceneTopology) -> Self {
        let envs = topology.num_envs;
        let actors = envs * topology.actors_per_env();
        let bodies = envs * topology.bodies_per_env();
        let dofs = envs * topology.dofs_per_env();

        let articulated = topology.actors.iter().filter(|a| a.num_dofs() > 0);
        let jacobians = articulated
            .clone()
            .map(|a| {
                let links = a.num_bodies().saturating_sub(1);
                (a.name.clone(), vec![envs, links, TASK_DIM, a.num_dofs()])
            })
            .collect();
        let mass_matrices = articulated
            .map(|a| (a.name.clone(), vec![envs, a.num_dofs(), a.num_dofs()]))
            .collect();

        Self {
            root_state: vec![actors, BODY_STATE_WIDTH],
            body_state: vec![bodies, BODY_STATE_WIDTH],
            dof_state: vec![dofs, DOF_STATE_WIDTH],
            dof_force: vec![dofs],
            net_contact_force: vec![bodies, CONTACT_FORCE_WIDTH],
            jacobians,
            mass_matrices,
        }
    }

    /// Checks every tensor `actual` publishes against `self`.
    pub fn validate(&self, actual: &SnapshotShapes) -> ControlResult<()> {
        check_shape("root_state", &self.root_state, &actual.root_state)?;
        check_shape("body_state", &self.body_state, &actual.body_state)?;
        check_shape("dof_state", &self.dof_state, &actual.dof_state)?;
        check_shape("dof_force", &self.dof_force, &actual.dof_force)?;
        check_shape(
            "net_contact_force",
            &self.net_contact_force,
            &actual.net_contact_force,
        )?;
        validate_keyed("jacobian", &self.jacobians, &actual.jacobians)?;
        validate_keyed("mass_matrix", &self.mass_matrices, &actual.mass_matrices)
    }
}

fn validate_keyed(
    kind: &str,
    expected: &BTreeMap<String, Vec<usize>>,
    actual: &BTreeMap<String, Vec<usize>>,
) -> ControlResult<()> {
    for (actor, shape) in expected {
        let name = format!("{kind}[{actor}]");
        match actual.get(actor) {
            Some(found) => check_shape(&name, shape, found)?,
            None => return check_shape(&name, shape, &[]),
        }
    }
    Ok(())
}

impl SimSnapshot {
    pub fn shapes(&self) -> SnapshotShapes {
        let keyed = |m: &BTreeMap<String, Tensor>| {
            m.iter()
                .map(|(k, t)| (k.clone(), t.shape().to_vec()))
                .collect()
        };
        SnapshotShapes {
            root_state: self.root_state.shape().to_vec(),
            body_state: self.body_state.shape().to_vec(),
            dof_state: self.dof_state.shape().to_vec(),
            dof_force: self.dof_force.shape().to_vec(),
            net_contact_force: self.net_contact_force.shape().to_vec(),
            jacobians: keyed(&self.jacobians),
            mass_matrices: keyed(&self.mass_matrices),
        }
    }
}

// =========================================================================
// == Drives ==
// =========================================================================

/// How the engine interprets a DOF's command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// The engine's own PD servo tracks a position target.
    Position,
    /// Commands are applied directly as joint torques or forces.
    Effort,
}

/// Per-DOF drive settings pushed to the engine once at setup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DofDriveProperties {
    pub mode: DriveMode,
    pub stiffness: f64,
    pub damping: f64,
}

// =========================================================================
// == Backend ==
// =========================================================================

/// The physics engine as seen by the controller.
///
/// Indexed writes take a buffer covering *all* DOFs (or all actors) of all
/// environments together with the global actor indices whose slices should
/// be applied; slices of other actors are ignored.
pub trait SimulationBackend: Send + Sync {
    fn topology(&self) -> &SceneTopology;

    /// Shapes of the tensors [`SimulationBackend::refresh`] returns.
    fn shapes(&self) -> SnapshotShapes;

    /// Refreshes and returns all state tensors. Must be called after each
    /// [`SimulationBackend::simulate`] and before any state is read.
    fn refresh(&mut self) -> ControlResult<SimSnapshot>;

    /// Overwrites the drive settings of every DOF of one actor in one environment.
    fn set_dof_drive_properties(
        &mut self,
        env: usize,
        actor_index: usize,
        properties: &[DofDriveProperties],
    ) -> ControlResult<()>;

    /// `targets` has one entry per DOF of all environments.
    fn set_dof_position_targets_indexed(
        &mut self,
        targets: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()>;

    /// `forces` has one entry per DOF of all environments.
    fn set_dof_actuation_forces_indexed(
        &mut self,
        forces: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()>;

    /// `dof_state` is laid out like [`SimSnapshot::dof_state`].
    fn set_dof_state_indexed(&mut self, dof_state: &[f64], actor_ids: &[usize])
        -> ControlResult<()>;

    /// `root_state` is laid out like [`SimSnapshot::root_state`].
    fn set_root_state_indexed(
        &mut self,
        root_state: &[f64],
        actor_ids: &[usize],
    ) -> ControlResult<()>;

    fn set_gravity(&mut self, gravity: Vector3<f64>);

    /// Advances the physics by one control tick.
    fn simulate(&mut self) -> ControlResult<()>;
}
