// tandem_core/src/kinematics/extractor.rs

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Vector3};

use super::ArmState;
use crate::error::{ControlError, ControlResult};
use crate::frames::layout::{ArmLayout, BodySlot, FrameTable};
use crate::frames::{derive_fingertip_midpoint, RigidBodyFrame};
use crate::simulator::{SimSnapshot, SnapshotShapes, Tensor};
use crate::types::{Jacobian, TASK_DIM};

/// Turns raw snapshot tensors into named per-arm views.
///
/// Construction validates the simulator's published shapes against the frame
/// table, so a mismatched integration fails at startup rather than mid-run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "bevy", derive(bevy_ecs::prelude::Resource))]
pub struct KinematicStateExtractor {
    table: FrameTable,
    expected: SnapshotShapes,
}

impl KinematicStateExtractor {
    pub fn new(table: FrameTable, published: &SnapshotShapes) -> ControlResult<Self> {
        let expected = SnapshotShapes::for_topology(table.topology());
        expected.validate(published)?;
        Ok(Self { table, expected })
    }

    pub fn table(&self) -> &FrameTable {
        &self.table
    }

    /// Builds `[env][arm]` states from a freshly refreshed snapshot.
    pub fn extract(&self, snapshot: &SimSnapshot) -> ControlResult<Vec<Vec<ArmState>>> {
        self.expected.validate(&snapshot.shapes())?;
        (0..self.table.num_envs())
            .map(|env| {
                (0..self.table.arms().len())
                    .map(|arm| self.extract_arm(snapshot, env, arm))
                    .collect()
            })
            .collect()
    }

    /// Builds the state of a single arm in a single environment.
    pub fn extract_arm(
        &self,
        snapshot: &SimSnapshot,
        env: usize,
        arm: usize,
    ) -> ControlResult<ArmState> {
        let layout = &self.table.arms()[arm];
        let topology = self.table.topology();
        let body_base = env * topology.bodies_per_env();

        let frame = |slot: BodySlot| {
            RigidBodyFrame::from_state_row(snapshot.body_state.row(body_base + slot.body))
        };
        let contact = |slot: BodySlot| {
            let row = snapshot.net_contact_force.row(body_base + slot.body);
            Vector3::new(row[0], row[1], row[2])
        };

        let hand = frame(layout.hand);
        let left_finger = frame(layout.left_finger);
        let right_finger = frame(layout.right_finger);
        let fingertip_centered = frame(layout.fingertip_centered);
        let fingertip_midpoint = derive_fingertip_midpoint(
            &hand,
            &left_finger,
            &right_finger,
            &fingertip_centered,
            layout.finger_length,
        );

        let jacobian = tensor_for(
            &snapshot.jacobians,
            &self.expected.jacobians,
            "jacobian",
            &layout.actor,
        )?;
        let hand_jacobian = arm_jacobian(jacobian, layout, env, layout.hand);
        let left_finger_jacobian = arm_jacobian(jacobian, layout, env, layout.left_finger);
        let right_finger_jacobian = arm_jacobian(jacobian, layout, env, layout.right_finger);
        let fingertip_midpoint_jacobian = (&left_finger_jacobian + &right_finger_jacobian) * 0.5;

        let mass = tensor_for(
            &snapshot.mass_matrices,
            &self.expected.mass_matrices,
            "mass_matrix",
            &layout.actor,
        )?;
        let mass_matrix = arm_mass_matrix(mass, layout, env);

        let dof_base = self.table.global_dof_offset(env, arm);
        let n = layout.num_dofs();
        let dof_positions =
            DVector::from_iterator(n, (0..n).map(|i| snapshot.dof_state.row(dof_base + i)[0]));
        let dof_velocities =
            DVector::from_iterator(n, (0..n).map(|i| snapshot.dof_state.row(dof_base + i)[1]));
        let dof_forces =
            DVector::from_row_slice(&snapshot.dof_force.data()[dof_base..dof_base + n]);

        Ok(ArmState {
            left_finger_contact_force: contact(layout.left_finger),
            right_finger_contact_force: contact(layout.right_finger),
            hand,
            left_finger,
            right_finger,
            fingertip_centered,
            fingertip_midpoint,
            hand_jacobian,
            left_finger_jacobian,
            right_finger_jacobian,
            fingertip_midpoint_jacobian,
            mass_matrix,
            dof_positions,
            dof_velocities,
            dof_forces,
            num_arm_dofs: layout.num_arm_dofs,
        })
    }
}

fn tensor_for<'a>(
    tensors: &'a BTreeMap<String, Tensor>,
    expected: &BTreeMap<String, Vec<usize>>,
    kind: &str,
    actor: &str,
) -> ControlResult<&'a Tensor> {
    tensors.get(actor).ok_or_else(|| ControlError::ShapeMismatch {
        tensor: format!("{kind}[{actor}]"),
        expected: expected.get(actor).cloned().unwrap_or_default(),
        actual: Vec::new(),
    })
}

/// Slices `(envs, links, 6, actor_dofs)` down to one link's `6 x num_arm_dofs` block.
fn arm_jacobian(jacobian: &Tensor, layout: &ArmLayout, env: usize, slot: BodySlot) -> Jacobian {
    let links = layout.num_actor_bodies - 1;
    let dofs = layout.num_actor_dofs;
    let start = ((env * links + slot.link) * TASK_DIM) * dofs;
    let block = &jacobian.data()[start..start + TASK_DIM * dofs];
    DMatrix::from_fn(TASK_DIM, layout.num_arm_dofs, |r, c| block[r * dofs + c])
}

/// Slices `(envs, actor_dofs, actor_dofs)` down to the arm-only block.
fn arm_mass_matrix(mass: &Tensor, layout: &ArmLayout, env: usize) -> DMatrix<f64> {
    let dofs = layout.num_actor_dofs;
    let block = mass.row(env);
    DMatrix::from_fn(layout.num_arm_dofs, layout.num_arm_dofs, |r, c| {
        block[r * dofs + c]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::layout::tests::{dual_arm_topology, franka_arm};
    use crate::types::BODY_STATE_WIDTH;
    use approx::assert_abs_diff_eq;
    use nalgebra::UnitQuaternion;

    const F64_EPSILON: f64 = 1e-9;

    fn table(num_envs: usize) -> FrameTable {
        FrameTable::build(
            dual_arm_topology(num_envs),
            &[franka_arm("franka_0"), franka_arm("franka_1")],
        )
        .unwrap()
    }

    /// A snapshot whose every float encodes where it came from, so slicing
    /// mistakes show up as wrong numbers.
    fn tagged_snapshot(table: &FrameTable) -> SimSnapshot {
        let shapes = SnapshotShapes::for_topology(table.topology());
        let mut snapshot = SimSnapshot {
            root_state: Tensor::zeros(&shapes.root_state),
            body_state: Tensor::zeros(&shapes.body_state),
            dof_state: Tensor::zeros(&shapes.dof_state),
            dof_force: Tensor::zeros(&shapes.dof_force),
            net_contact_force: Tensor::zeros(&shapes.net_contact_force),
            ..Default::default()
        };
        for body in 0..shapes.body_state[0] {
            let row = snapshot.body_state.row_mut(body);
            row[0] = body as f64;
            row[6] = 1.0; // identity quaternion
            snapshot.net_contact_force.row_mut(body)[2] = body as f64;
        }
        for dof in 0..shapes.dof_state[0] {
            let row = snapshot.dof_state.row_mut(dof);
            row[0] = dof as f64;
            row[1] = -(dof as f64);
        }
        for (actor, shape) in &shapes.jacobians {
            let data = (0..shape.iter().product::<usize>()).map(|i| i as f64).collect();
            snapshot
                .jacobians
                .insert(actor.clone(), Tensor::from_vec(shape, data).unwrap());
        }
        for (actor, shape) in &shapes.mass_matrices {
            let data = (0..shape.iter().product::<usize>()).map(|i| i as f64).collect();
            snapshot
                .mass_matrices
                .insert(actor.clone(), Tensor::from_vec(shape, data).unwrap());
        }
        snapshot
    }

    #[test]
    fn test_new_rejects_mismatched_shapes() {
        let table = table(2);
        let mut shapes = SnapshotShapes::for_topology(table.topology());
        shapes.body_state = vec![51, BODY_STATE_WIDTH];
        let err = KinematicStateExtractor::new(table, &shapes).unwrap_err();
        assert!(matches!(err, ControlError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_extract_slices_the_right_rows() {
        let table = table(2);
        let shapes = SnapshotShapes::for_topology(table.topology());
        let extractor = KinematicStateExtractor::new(table, &shapes).unwrap();
        let snapshot = tagged_snapshot(extractor.table());

        let states = extractor.extract(&snapshot).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].len(), 2);

        // Env 1, arm 1: bodies start at 26 + 13, DOFs at 18 + 9.
        let s = &states[1][1];
        assert_abs_diff_eq!(s.hand.position.x, (26 + 21) as f64, epsilon = F64_EPSILON);
        assert_abs_diff_eq!(s.left_finger.position.x, (26 + 22) as f64, epsilon = F64_EPSILON);
        assert_abs_diff_eq!(
            s.right_finger_contact_force.z,
            (26 + 23) as f64,
            epsilon = F64_EPSILON
        );
        assert_eq!(s.dof_positions.len(), 9);
        assert_abs_diff_eq!(s.dof_positions[0], 27.0, epsilon = F64_EPSILON);
        assert_abs_diff_eq!(s.gripper_velocities()[1], -35.0, epsilon = F64_EPSILON);
        assert_eq!(s.hand_jacobian.shape(), (6, 7));
        assert_eq!(s.mass_matrix.shape(), (7, 7));

        // Jacobian tensor (2, 11, 6, 9): env 1, hand link 7, row 2, col 3.
        let expected = (((11 + 7) * 6 + 2) * 9 + 3) as f64;
        assert_abs_diff_eq!(s.hand_jacobian[(2, 3)], expected, epsilon = F64_EPSILON);
        // Mass tensor (2, 9, 9): env 1, row 4, col 6; gripper columns dropped.
        assert_abs_diff_eq!(s.mass_matrix[(4, 6)], (81 + 4 * 9 + 6) as f64, epsilon = F64_EPSILON);
    }

    #[test]
    fn test_midpoint_jacobian_is_finger_average() {
        let table = table(1);
        let shapes = SnapshotShapes::for_topology(table.topology());
        let extractor = KinematicStateExtractor::new(table, &shapes).unwrap();
        let snapshot = tagged_snapshot(extractor.table());

        let s = extractor.extract_arm(&snapshot, 0, 0).unwrap();
        let mean = (&s.left_finger_jacobian + &s.right_finger_jacobian) * 0.5;
        assert_abs_diff_eq!(s.fingertip_midpoint_jacobian, mean, epsilon = F64_EPSILON);
        assert_abs_diff_eq!(
            s.fingertip_midpoint.orientation.angle_to(&UnitQuaternion::identity()),
            0.0,
            epsilon = F64_EPSILON
        );
    }

    #[test]
    fn test_extract_rejects_snapshot_missing_a_jacobian() {
        let table = table(1);
        let shapes = SnapshotShapes::for_topology(table.topology());
        let extractor = KinematicStateExtractor::new(table, &shapes).unwrap();
        let mut snapshot = tagged_snapshot(extractor.table());
        snapshot.jacobians.remove("franka_1");
        assert!(extractor.extract(&snapshot).is_err());
    }
}
