// tandem_core/src/control/drive.rs

//! One-time drive setup that matches the engine's DOF drives to the motor
//! backend of the configured mode.

use tracing::info;

use super::config::{ControlMode, ControllerConfig};
use crate::error::{ConfigurationError, ControlResult};
use crate::frames::layout::{ArmLayout, FrameTable};
use crate::simulator::{DofDriveProperties, DriveMode, SimulationBackend};

/// Drive settings for every DOF of an arm's actor.
///
/// The native-PD backend uses position drives whose stiffness and damping are
/// the joint gains followed by the gripper gains, which together must cover
/// every arm and gripper DOF. The manual backend uses effort drives with zero
/// stiffness and damping, so the engine applies the commanded torques untouched.
pub fn drive_properties(
    config: &ControllerConfig,
    layout: &ArmLayout,
) -> ControlResult<Vec<DofDriveProperties>> {
    let effort = DofDriveProperties {
        mode: DriveMode::Effort,
        stiffness: 0.0,
        damping: 0.0,
    };
    let mut properties = vec![effort; layout.num_actor_dofs];

    if let ControlMode::GymDefault { joint_gains, .. } = &config.mode {
        let gripper = &config.gripper_gains;
        let covered = joint_gains.len() + gripper.len();
        if covered != layout.num_dofs() {
            return Err(ConfigurationError::DriveGainCount {
                actor: layout.actor.clone(),
                expected: layout.num_dofs(),
                actual: covered,
            }
            .into());
        }

        let stiffness = joint_gains.kp.iter().chain(gripper.kp.iter());
        let damping = joint_gains.kd.iter().chain(gripper.kd.iter());
        for (slot, (kp, kd)) in properties.iter_mut().zip(stiffness.zip(damping)) {
            *slot = DofDriveProperties {
                mode: DriveMode::Position,
                stiffness: *kp,
                damping: *kd,
            };
        }
    }
    Ok(properties)
}

/// Pushes drive settings for every arm in every environment. Run once, before
/// the first control tick.
pub fn configure_arm_drives(
    backend: &mut dyn SimulationBackend,
    table: &FrameTable,
    config: &ControllerConfig,
) -> ControlResult<()> {
    for layout in table.arms() {
        let properties = drive_properties(config, layout)?;
        for env in 0..table.num_envs() {
            backend.set_dof_drive_properties(env, layout.actor_index, &properties)?;
        }
    }
    info!(
        "Configured {:?} drives for {} arm(s) in {} env(s) (mode: {})",
        config.backend(),
        table.arms().len(),
        table.num_envs(),
        config.kind()
    );
    Ok(())
}
