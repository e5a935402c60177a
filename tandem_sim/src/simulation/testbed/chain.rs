// tandem_sim/src/simulation/testbed/chain.rs

//! Serial-chain kinematics and composite inertia for the testbed arms.
//!
//! Each link is a point mass with an isotropic rotational inertia, both at the
//! link origin. That is crude next to a real articulated-body solver, but it
//! yields a symmetric positive-definite joint-space inertia whose coupling is
//! consistent with the published Jacobians, which is all the controller sees.

use nalgebra::{DMatrix, DVector, Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use tandem_core::types::{Jacobian, TASK_DIM};

use crate::simulation::config::structs::{ArmConfig, JointKind};
use crate::simulation::config::ScenarioError;

#[derive(Debug, Clone)]
struct ChainJoint {
    kind: JointKind,
    parent: usize,
    child: usize,
    /// Joint frame relative to the parent body.
    origin: Isometry3<f64>,
    axis: Unit<Vector3<f64>>,
    dof: Option<usize>,
}

/// World-frame axis and anchor of one DOF at a given configuration.
#[derive(Debug, Clone, Copy)]
struct DofAxis {
    kind: JointKind,
    axis: Vector3<f64>,
    anchor: Vector3<f64>,
}

/// Body poses of a chain at one configuration.
#[derive(Debug, Clone)]
pub struct ChainPose {
    /// World pose of every body, in link order.
    pub bodies: Vec<Isometry3<f64>>,
    dof_axes: Vec<DofAxis>,
}

/// A contact point rigidly attached to a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    pub body: usize,
    pub offset: Vector3<f64>,
}

/// A tree of links connected by revolute, prismatic and fixed joints.
#[derive(Debug, Clone)]
pub struct ArticulatedChain {
    masses: Vec<f64>,
    inertias: Vec<f64>,
    joints: Vec<ChainJoint>,
    /// The DOFs whose motion moves each body.
    supporting_dofs: Vec<Vec<usize>>,
    limits: Vec<Option<[f64; 2]>>,
    num_dofs: usize,
    armature: f64,
    friction: f64,
    contact_points: Vec<ContactPoint>,
}

impl ArticulatedChain {
    /// Builds the chain from an arm entry.
    ///
    /// Joints must be listed parent-first and every link except the base must
    /// be the child of exactly one joint. DOFs are numbered in joint order,
    /// skipping fixed joints.
    pub fn from_config(arm: &ArmConfig) -> Result<Self, ScenarioError> {
        let invalid =
            |message: String| ScenarioError::Invalid(format!("arm '{}': {}", arm.name, message));
        let names: Vec<&str> = arm.links.iter().map(|l| l.name.as_str()).collect();
        let index_of = |name: &str| {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or_else(|| invalid(format!("unknown link '{name}'")))
        };
        if names.is_empty() {
            return Err(invalid("no links".to_string()));
        }

        let mut placed = vec![false; names.len()];
        placed[0] = true;
        let mut supporting_dofs = vec![Vec::new(); names.len()];
        let mut joints = Vec::with_capacity(arm.joints.len());
        let mut limits = Vec::new();

        for joint in &arm.joints {
            let parent = index_of(joint.parent.as_str())?;
            let child = index_of(joint.child.as_str())?;
            if !placed[parent] || placed[child] {
                return Err(invalid(format!(
                    "joint '{}' must connect an already placed parent to a new child",
                    joint.name
                )));
            }
            placed[child] = true;

            let axis = Unit::try_new(Vector3::from(joint.axis), 1.0e-9)
                .ok_or_else(|| invalid(format!("joint '{}' has a zero axis", joint.name)))?;
            let dof = match joint.kind {
                JointKind::Fixed => None,
                JointKind::Revolute | JointKind::Prismatic => {
                    limits.push(joint.limits);
                    Some(limits.len() - 1)
                }
            };

            let mut support = supporting_dofs[parent].clone();
            support.extend(dof);
            supporting_dofs[child] = support;

            let [roll, pitch, yaw] = joint.rpy;
            joints.push(ChainJoint {
                kind: joint.kind,
                parent,
                child,
                origin: Isometry3::from_parts(
                    Translation3::from(Vector3::from(joint.xyz)),
                    UnitQuaternion::from_euler_angles(roll, pitch, yaw),
                ),
                axis,
                dof,
            });
        }

        if let Some(orphan) = placed.iter().position(|p| !p) {
            return Err(invalid(format!("link '{}' is not attached by any joint", names[orphan])));
        }

        let contact_points = arm
            .contact_points
            .iter()
            .map(|c| {
                Ok(ContactPoint {
                    body: index_of(c.body.as_str())?,
                    offset: Vector3::from(c.offset),
                })
            })
            .collect::<Result<Vec<_>, ScenarioError>>()?;

        Ok(Self {
            masses: arm.links.iter().map(|l| l.mass).collect(),
            inertias: arm.links.iter().map(|l| l.inertia).collect(),
            joints,
            supporting_dofs,
            num_dofs: limits.len(),
            limits,
            armature: arm.armature,
            friction: arm.joint_friction,
            contact_points,
        })
    }

    pub fn num_bodies(&self) -> usize {
        self.masses.len()
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub fn contact_points(&self) -> &[ContactPoint] {
        &self.contact_points
    }

    /// Forward kinematics from the world pose of the base.
    pub fn pose(&self, base: &Isometry3<f64>, q: &DVector<f64>) -> ChainPose {
        let unused = DofAxis {
            kind: JointKind::Fixed,
            axis: Vector3::zeros(),
            anchor: Vector3::zeros(),
        };
        let mut bodies = vec![*base; self.num_bodies()];
        let mut dof_axes = vec![unused; self.num_dofs];

        for joint in &self.joints {
            let frame = bodies[joint.parent] * joint.origin;
            let motion = match joint.dof {
                Some(dof) => {
                    dof_axes[dof] = DofAxis {
                        kind: joint.kind,
                        axis: frame.rotation * joint.axis.into_inner(),
                        anchor: frame.translation.vector,
                    };
                    joint_motion(joint.kind, &joint.axis, q[dof])
                }
                None => Isometry3::identity(),
            };
            bodies[joint.child] = frame * motion;
        }

        ChainPose { bodies, dof_axes }
    }

    /// `6 x dofs` Jacobian of a world point rigidly attached to `body`.
    pub fn point_jacobian(&self, pose: &ChainPose, body: usize, point: &Vector3<f64>) -> Jacobian {
        let mut jacobian = Jacobian::zeros(TASK_DIM, self.num_dofs);
        for &dof in &self.supporting_dofs[body] {
            let DofAxis { kind, axis, anchor } = pose.dof_axes[dof];
            match kind {
                JointKind::Revolute => {
                    let linear = axis.cross(&(point - anchor));
                    jacobian.fixed_view_mut::<3, 1>(0, dof).copy_from(&linear);
                    jacobian.fixed_view_mut::<3, 1>(3, dof).copy_from(&axis);
                }
                JointKind::Prismatic => {
                    jacobian.fixed_view_mut::<3, 1>(0, dof).copy_from(&axis);
                }
                JointKind::Fixed => {}
            }
        }
        jacobian
    }

    /// Jacobian of the origin of `body`.
    pub fn body_jacobian(&self, pose: &ChainPose, body: usize) -> Jacobian {
        self.point_jacobian(pose, body, &pose.bodies[body].translation.vector)
    }

    /// `M = sum(m J_v^T J_v + I J_w^T J_w) + armature * 1`
    pub fn mass_matrix(&self, pose: &ChainPose) -> DMatrix<f64> {
        let mut mass = DMatrix::identity(self.num_dofs, self.num_dofs) * self.armature;
        for body in 0..self.num_bodies() {
            let (m, inertia) = (self.masses[body], self.inertias[body]);
            if m == 0.0 && inertia == 0.0 {
                continue;
            }
            let jacobian = self.body_jacobian(pose, body);
            let linear = jacobian.rows(0, 3);
            let angular = jacobian.rows(3, 3);
            mass += linear.transpose() * linear * m + angular.transpose() * angular * inertia;
        }
        mass
    }

    /// Clamps positions into their limits and stops any DOF pushing past one.
    pub fn enforce_limits(&self, q: &mut DVector<f64>, qd: &mut DVector<f64>) {
        for (dof, limits) in self.limits.iter().enumerate() {
            let Some([lower, upper]) = *limits else {
                continue;
            };
            if q[dof] < lower {
                q[dof] = lower;
                qd[dof] = qd[dof].max(0.0);
            } else if q[dof] > upper {
                q[dof] = upper;
                qd[dof] = qd[dof].min(0.0);
            }
        }
    }
}

fn joint_motion(kind: JointKind, axis: &Unit<Vector3<f64>>, position: f64) -> Isometry3<f64> {
    match kind {
        JointKind::Revolute => Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(axis, position),
        ),
        JointKind::Prismatic => Isometry3::from_parts(
            Translation3::from(axis.into_inner() * position),
            UnitQuaternion::identity(),
        ),
        JointKind::Fixed => Isometry3::identity(),
    }
}
