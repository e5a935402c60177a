// tandem_core/src/dispatch.rs

//! Batches per-arm commands into one indexed simulator write per tick.

use nalgebra::DVector;
use tracing::trace;

use crate::control::law::ArmCommand;
use crate::error::{ConfigurationError, ControlError, ControlResult};
use crate::frames::layout::FrameTable;
use crate::simulator::SimulationBackend;

/// Owns the full-size command buffer and the cached global actor ids of every
/// controlled arm.
///
/// Actor ids are computed once at construction as
/// `env * actors_per_env + actor_index` and never recomputed.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "bevy", derive(bevy_ecs::prelude::Resource))]
pub struct CommandDispatcher {
    table: FrameTable,
    actor_ids: Vec<usize>,
    buffer: Vec<f64>,
}

impl CommandDispatcher {
    pub fn new(table: &FrameTable) -> Self {
        let topology = table.topology();
        let actor_ids = (0..table.num_envs())
            .flat_map(|env| {
                table
                    .arms()
                    .iter()
                    .map(move |arm| topology.global_actor_index(env, arm.actor_index))
            })
            .collect();
        let buffer = vec![0.0; table.num_envs() * topology.dofs_per_env()];
        Self {
            table: table.clone(),
            actor_ids,
            buffer,
        }
    }

    /// Global ids of every controlled actor, env-major then arm order.
    pub fn actor_ids(&self) -> &[usize] {
        &self.actor_ids
    }

    /// One environment's commands concatenated in arm order.
    pub fn combine(commands: &[ArmCommand]) -> DVector<f64> {
        DVector::from_iterator(
            commands.iter().map(|c| c.values().len()).sum(),
            commands.iter().flat_map(|c| c.values().iter().copied()),
        )
    }

    /// Writes `commands[env][arm]` into the shared buffer and applies it with
    /// a single indexed call.
    ///
    /// Every command in the batch must be of the same kind; a batch mixing
    /// position targets and torques is a configuration error.
    pub fn dispatch(
        &mut self,
        backend: &mut dyn SimulationBackend,
        commands: &[Vec<ArmCommand>],
    ) -> ControlResult<()> {
        let Some(torque) = self.batch_kind(commands)? else {
            return Ok(());
        };

        for (env, env_commands) in commands.iter().enumerate() {
            let combined = Self::combine(env_commands);
            let mut local = 0;
            for (arm, layout) in self.table.arms().iter().enumerate() {
                // Arms need not be adjacent in the global DOF space.
                let start = self.table.global_dof_offset(env, arm);
                let n = layout.num_dofs();
                self.buffer[start..start + n]
                    .copy_from_slice(&combined.as_slice()[local..local + n]);
                local += n;
            }
        }

        trace!(
            "Dispatching {} to {} actor(s)",
            if torque { "torques" } else { "position targets" },
            self.actor_ids.len()
        );
        if torque {
            backend.set_dof_actuation_forces_indexed(&self.buffer, &self.actor_ids)
        } else {
            backend.set_dof_position_targets_indexed(&self.buffer, &self.actor_ids)
        }
    }

    /// Validates the batch layout. Returns `Some(true)` for torques,
    /// `Some(false)` for position targets and `None` for an empty batch.
    fn batch_kind(&self, commands: &[Vec<ArmCommand>]) -> ControlResult<Option<bool>> {
        let num_envs = self.table.num_envs();
        let num_arms = self.table.arms().len();
        if commands.len() != num_envs || commands.iter().any(|env| env.len() != num_arms) {
            return Err(ControlError::ShapeMismatch {
                tensor: "commands".to_string(),
                expected: vec![num_envs, num_arms],
                actual: vec![
                    commands.len(),
                    commands.first().map(Vec::len).unwrap_or_default(),
                ],
            });
        }

        for env_commands in commands {
            for (command, layout) in env_commands.iter().zip(self.table.arms()) {
                if command.values().len() != layout.num_dofs() {
                    return Err(ControlError::ShapeMismatch {
                        tensor: format!("command[{}]", layout.actor),
                        expected: vec![layout.num_dofs()],
                        actual: vec![command.values().len()],
                    });
                }
            }
        }

        let mut kinds = commands.iter().flatten().map(ArmCommand::is_torque);
        let Some(first) = kinds.next() else {
            return Ok(None);
        };
        if kinds.any(|kind| kind != first) {
            return Err(ConfigurationError::MixedCommandKinds.into());
        }
        Ok(Some(first))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frames::layout::tests::{dual_arm_topology, franka_arm};
    use crate::frames::layout::SceneTopology;
    use crate::simulator::{DofDriveProperties, SimSnapshot, SnapshotShapes};
    use nalgebra::Vector3;

    /// Records every write it receives.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub topology: Option<SceneTopology>,
        pub position_writes: Vec<(Vec<f64>, Vec<usize>)>,
        pub force_writes: Vec<(Vec<f64>, Vec<usize>)>,
        pub drive_writes: Vec<(usize, usize, Vec<DofDriveProperties>)>,
    }

    impl SimulationBackend for RecordingBackend {
        fn topology(&self) -> &SceneTopology {
            self.topology.as_ref().unwrap()
        }

        fn shapes(&self) -> SnapshotShapes {
            SnapshotShapes::for_topology(self.topology())
        }

        fn refresh(&mut self) -> ControlResult<SimSnapshot> {
            Ok(SimSnapshot::default())
        }

        fn set_dof_drive_properties(
            &mut self,
            env: usize,
            actor_index: usize,
            properties: &[DofDriveProperties],
        ) -> ControlResult<()> {
            self.drive_writes.push((env, actor_index, properties.to_vec()));
            Ok(())
        }

        fn set_dof_position_targets_indexed(
            &mut self,
            targets: &[f64],
            actor_ids: &[usize],
        ) -> ControlResult<()> {
            self.position_writes.push((targets.to_vec(), actor_ids.to_vec()));
            Ok(())
        }

        fn set_dof_actuation_forces_indexed(
            &mut self,
            forces: &[f64],
            actor_ids: &[usize],
        ) -> ControlResult<()> {
            self.force_writes.push((forces.to_vec(), actor_ids.to_vec()));
            Ok(())
        }

        fn set_dof_state_indexed(&mut self, _: &[f64], _: &[usize]) -> ControlResult<()> {
            Ok(())
        }

        fn set_root_state_indexed(&mut self, _: &[f64], _: &[usize]) -> ControlResult<()> {
            Ok(())
        }

        fn set_gravity(&mut self, _: Vector3<f64>) {}

        fn simulate(&mut self) -> ControlResult<()> {
            Ok(())
        }
    }

    fn table(num_envs: usize) -> FrameTable {
        FrameTable::build(
            dual_arm_topology(num_envs),
            &[franka_arm("franka_0"), franka_arm("franka_1")],
        )
        .unwrap()
    }

    fn torques(first: f64) -> ArmCommand {
        ArmCommand::Torques(DVector::from_fn(9, |i, _| first + i as f64))
    }

    #[test]
    fn test_combine_keeps_arm_order() {
        let combined = CommandDispatcher::combine(&[torques(0.0), torques(100.0)]);
        assert_eq!(combined.len(), 18);
        assert_eq!(combined[0], 0.0);
        assert_eq!(combined[8], 8.0);
        assert_eq!(combined[9], 100.0);
        assert_eq!(combined[17], 108.0);
    }

    #[test]
    fn test_actor_ids_are_cached_per_env_and_arm() {
        let dispatcher = CommandDispatcher::new(&table(3));
        // Arms are actors 0 and 2 out of 4 per env.
        assert_eq!(dispatcher.actor_ids(), &[0, 2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_dispatch_issues_a_single_write() {
        let table = table(2);
        let mut dispatcher = CommandDispatcher::new(&table);
        let mut backend = RecordingBackend {
            topology: Some(table.topology().clone()),
            ..Default::default()
        };
        let commands = vec![
            vec![torques(0.0), torques(100.0)],
            vec![torques(200.0), torques(300.0)],
        ];

        dispatcher.dispatch(&mut backend, &commands).unwrap();

        assert_eq!(backend.force_writes.len(), 1);
        assert!(backend.position_writes.is_empty());
        let (buffer, ids) = &backend.force_writes[0];
        assert_eq!(buffer.len(), 36);
        assert_eq!(ids, &vec![0, 2, 4, 6]);
        assert_eq!(buffer[9], 100.0);
        assert_eq!(buffer[18 + 9 + 8], 308.0);
    }

    #[test]
    fn test_position_targets_go_to_the_position_api() {
        let table = table(1);
        let mut dispatcher = CommandDispatcher::new(&table);
        let mut backend = RecordingBackend {
            topology: Some(table.topology().clone()),
            ..Default::default()
        };
        let target = || ArmCommand::PositionTargets(DVector::from_element(9, 0.5));
        dispatcher
            .dispatch(&mut backend, &[vec![target(), target()]])
            .unwrap();
        assert_eq!(backend.position_writes.len(), 1);
        assert!(backend.force_writes.is_empty());
    }

    #[test]
    fn test_mixed_batches_are_rejected() {
        let table = table(1);
        let mut dispatcher = CommandDispatcher::new(&table);
        let mut backend = RecordingBackend {
            topology: Some(table.topology().clone()),
            ..Default::default()
        };
        let mixed = vec![vec![
            torques(0.0),
            ArmCommand::PositionTargets(DVector::zeros(9)),
        ]];
        let err = dispatcher.dispatch(&mut backend, &mixed).unwrap_err();
        assert_eq!(
            err,
            ControlError::Configuration(ConfigurationError::MixedCommandKinds)
        );
        assert!(backend.force_writes.is_empty() && backend.position_writes.is_empty());
    }

    #[test]
    fn test_wrong_command_length_is_a_shape_mismatch() {
        let table = table(1);
        let mut dispatcher = CommandDispatcher::new(&table);
        let mut backend = RecordingBackend {
            topology: Some(table.topology().clone()),
            ..Default::default()
        };
        let short = vec![vec![torques(0.0), ArmCommand::Torques(DVector::zeros(7))]];
        assert!(matches!(
            dispatcher.dispatch(&mut backend, &short),
            Err(ControlError::ShapeMismatch { .. })
        ));
    }
}
