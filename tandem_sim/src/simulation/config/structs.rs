// tandem_sim/src/simulation/config/structs.rs

use bevy::prelude::Resource;
use figment::value::Value;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::Deserialize;
use tandem_core::actions::ActionScales;
use tandem_core::control::spec::ControllerSpec;
use tandem_core::frames::layout::{ActorDescription, ArmBodyNames, ArmDescription};

use super::ScenarioError;

// =========================================================================
// == Top-Level Configuration Resource ==
// =========================================================================

/// The root of a `scenario.toml` file.
///
/// Actor entries stay as raw values until they have been resolved against the
/// prefab catalog, because most of them are `{ from = "arms.franka_panda" }`
/// references plus overrides.
#[derive(Resource, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub simulation: SimulationSettings,

    #[serde(default)]
    pub world: WorldSettings,

    pub controller: ControllerSpec,

    #[serde(default)]
    pub task: TaskSettings,

    /// `[[actors]]`, in the order they are created in every environment.
    #[serde(default)]
    pub actors: Vec<Value>,
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SimulationSettings {
    /// Optional seed for the pseudo-random number generator for determinism.
    pub seed: Option<u64>,
    pub num_envs: usize,
    /// Environments are laid out along x, this far apart.
    pub env_spacing: f64,
    /// Control period in seconds. One control tick is one physics step.
    pub dt: f64,
    /// Integration substeps per physics step.
    pub substeps: usize,
    pub episodes: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: None,
            num_envs: 1,
            env_spacing: 1.5,
            dt: 1.0 / 60.0,
            substeps: 2,
            episodes: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct WorldSettings {
    /// Global gravity vector in m/s^2 (z up). Arms are gravity-compensated.
    pub gravity: [f64; 3],
    pub table_height: f64,
    pub contact_stiffness: f64,
    pub contact_damping: f64,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: [0.0, 0.0, -9.81],
            table_height: 0.0,
            contact_stiffness: 2000.0,
            contact_damping: 20.0,
        }
    }
}

/// Timing and noise of the scripted reach / grasp / lift episodes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TaskSettings {
    pub reach_ticks: usize,
    pub grasp_ticks: usize,
    pub lift_ticks: usize,
    pub lift_distance: f64,
    /// Standard deviation of the Gaussian noise added to reach goals, in meters.
    pub target_noise: f64,
    /// Standard deviation of the joint noise applied at reset, in radians.
    pub reset_joint_noise: f64,
    pub gripper_open: f64,
    pub gripper_closed: f64,
    pub actions: ActionScales,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            reach_ticks: 180,
            grasp_ticks: 30,
            lift_ticks: 120,
            lift_distance: 0.1,
            target_noise: 0.01,
            reset_joint_noise: 0.02,
            gripper_open: 0.04,
            gripper_closed: 0.0,
            actions: ActionScales::default(),
        }
    }
}

// =========================================================================
// == Actors ==
// =========================================================================

/// A fully resolved actor entry.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActorConfig {
    Arm(ArmConfig),
    Prop(PropConfig),
}

impl ActorConfig {
    pub fn name(&self) -> &str {
        match self {
            ActorConfig::Arm(arm) => &arm.name,
            ActorConfig::Prop(prop) => &prop.name,
        }
    }

    /// The body and DOF names this actor contributes to the scene topology.
    pub fn description(&self) -> ActorDescription {
        match self {
            ActorConfig::Arm(arm) => ActorDescription {
                name: arm.name.clone(),
                bodies: arm.links.iter().map(|l| l.name.clone()).collect(),
                dofs: arm
                    .joints
                    .iter()
                    .filter(|j| j.kind != JointKind::Fixed)
                    .map(|j| j.name.clone())
                    .collect(),
            },
            ActorConfig::Prop(prop) => ActorDescription {
                name: prop.name.clone(),
                bodies: vec![prop.name.clone()],
                dofs: Vec::new(),
            },
        }
    }

    /// Checks the counts a resolved entry must agree on.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let ActorConfig::Arm(arm) = self else {
            return Ok(());
        };
        let num_dofs = self.description().dofs.len();
        if arm.num_arm_dofs + arm.num_gripper_dofs != num_dofs {
            return Err(ScenarioError::Invalid(format!(
                "arm '{}' declares {} arm and {} gripper DOFs but its chain has {}",
                arm.name, arm.num_arm_dofs, arm.num_gripper_dofs, num_dofs
            )));
        }
        if arm.home_dof_positions.len() != num_dofs {
            return Err(ScenarioError::Invalid(format!(
                "arm '{}' has {} home positions for {} DOFs",
                arm.name,
                arm.home_dof_positions.len(),
                num_dofs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArmConfig {
    pub name: String,
    #[serde(default)]
    pub base_position: [f64; 3],
    /// Rotation of the base about world z, in radians.
    #[serde(default)]
    pub base_yaw: f64,
    /// Bodies in simulator order. The first entry is the fixed base.
    pub links: Vec<LinkConfig>,
    pub joints: Vec<JointConfig>,
    #[serde(default)]
    pub frames: ArmBodyNames,
    pub num_arm_dofs: usize,
    pub num_gripper_dofs: usize,
    pub finger_length: f64,
    pub home_dof_positions: Vec<f64>,
    #[serde(default = "default_armature")]
    pub armature: f64,
    #[serde(default)]
    pub joint_friction: f64,
    #[serde(default)]
    pub contact_points: Vec<ContactPointConfig>,
    /// Where the scripted reach goal sits relative to the initial fingertip midpoint.
    #[serde(default)]
    pub reach_offset: [f64; 3],
}

fn default_armature() -> f64 {
    0.1
}

impl ArmConfig {
    pub fn base_pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(Vector3::from(self.base_position)),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.base_yaw),
        )
    }

    pub fn description(&self) -> ArmDescription {
        ArmDescription {
            actor: self.name.clone(),
            bodies: self.frames.clone(),
            num_arm_dofs: self.num_arm_dofs,
            num_gripper_dofs: self.num_gripper_dofs,
            finger_length: self.finger_length,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub name: String,
    /// Point mass at the body origin, in kg.
    #[serde(default)]
    pub mass: f64,
    /// Isotropic rotational inertia about the body origin, in kg m^2.
    #[serde(default)]
    pub inertia: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Revolute,
    Prismatic,
    Fixed,
}

/// A URDF-style joint: the child frame sits at `parent * origin(xyz, rpy)`,
/// then moves along or about `axis`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JointConfig {
    pub name: String,
    pub kind: JointKind,
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub xyz: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
    #[serde(default = "default_axis")]
    pub axis: [f64; 3],
    /// Lower and upper position limit. Unlimited when absent.
    #[serde(default)]
    pub limits: Option<[f64; 2]>,
}

fn default_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

/// A point on a body that touches the table surface.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContactPointConfig {
    pub body: String,
    /// Offset in the body frame.
    #[serde(default)]
    pub offset: [f64; 3],
}

/// A single DOF-less rigid body that falls onto the table.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PropConfig {
    pub name: String,
    pub position: [f64; 3],
    #[serde(default)]
    pub yaw: f64,
    /// Height of the body origin above the table when resting on it.
    #[serde(default)]
    pub rest_height: f64,
}
