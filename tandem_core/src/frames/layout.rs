// tandem_core/src/frames/layout.rs

//! Named-frame lookup for the multi-actor scene.
//!
//! The simulator flattens every environment into one index space: actors,
//! rigid bodies and DOFs are numbered in actor creation order, and each
//! environment repeats the same sequence. [`FrameTable::build`] resolves the
//! bodies each arm controller needs by name, once, so no code downstream
//! carries hard-coded body offsets.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::frames::ArmBody;

/// One actor as created in every environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDescription {
    pub name: String,
    /// Rigid body names in simulator order. Index 0 is the actor's base.
    pub bodies: Vec<String>,
    pub dofs: Vec<String>,
}

impl ActorDescription {
    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn num_dofs(&self) -> usize {
        self.dofs.len()
    }
}

/// The per-environment actor sequence shared by all environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneTopology {
    pub num_envs: usize,
    pub actors: Vec<ActorDescription>,
}

impl SceneTopology {
    pub fn actors_per_env(&self) -> usize {
        self.actors.len()
    }

    pub fn bodies_per_env(&self) -> usize {
        self.actors.iter().map(ActorDescription::num_bodies).sum()
    }

    pub fn dofs_per_env(&self) -> usize {
        self.actors.iter().map(ActorDescription::num_dofs).sum()
    }

    pub fn actor_index(&self, name: &str) -> Option<usize> {
        self.actors.iter().position(|a| a.name == name)
    }

    /// Env-local index of the first body of actor `actor_index`.
    pub fn body_offset(&self, actor_index: usize) -> usize {
        self.actors[..actor_index]
            .iter()
            .map(ActorDescription::num_bodies)
            .sum()
    }

    /// Env-local index of the first DOF of actor `actor_index`.
    pub fn dof_offset(&self, actor_index: usize) -> usize {
        self.actors[..actor_index]
            .iter()
            .map(ActorDescription::num_dofs)
            .sum()
    }

    /// Index of an actor in the flattened root-state tensor.
    pub fn global_actor_index(&self, env: usize, actor_index: usize) -> usize {
        env * self.actors_per_env() + actor_index
    }
}

/// Body names an arm controller looks up on its actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArmBodyNames {
    pub hand: String,
    pub left_finger: String,
    pub right_finger: String,
    pub fingertip_centered: String,
}

impl Default for ArmBodyNames {
    fn default() -> Self {
        Self {
            hand: "panda_hand".to_string(),
            left_finger: "panda_leftfinger".to_string(),
            right_finger: "panda_rightfinger".to_string(),
            fingertip_centered: "panda_fingertip_centered".to_string(),
        }
    }
}

impl ArmBodyNames {
    pub fn name(&self, body: ArmBody) -> &str {
        match body {
            ArmBody::Hand => &self.hand,
            ArmBody::LeftFinger => &self.left_finger,
            ArmBody::RightFinger => &self.right_finger,
            ArmBody::FingertipCentered => &self.fingertip_centered,
        }
    }
}

/// What the controller needs to know about one arm before looking it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmDescription {
    /// Name of the arm's actor in the scene topology.
    pub actor: String,
    pub bodies: ArmBodyNames,
    pub num_arm_dofs: usize,
    pub num_gripper_dofs: usize,
    /// Distance from the finger bodies to the fingertips along the hand z-axis.
    pub finger_length: f64,
}

/// Where a named body lives in the simulator tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodySlot {
    /// Env-local rigid body index (row in the body-state tensor).
    pub body: usize,
    /// Link index in the actor's Jacobian tensor. The fixed base has no row,
    /// so this is the actor-local body index minus one.
    pub link: usize,
}

/// A fully resolved arm.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmLayout {
    pub actor: String,
    pub actor_index: usize,
    pub hand: BodySlot,
    pub left_finger: BodySlot,
    pub right_finger: BodySlot,
    pub fingertip_centered: BodySlot,
    /// Env-local index of the arm's first DOF.
    pub dof_offset: usize,
    pub num_actor_bodies: usize,
    pub num_actor_dofs: usize,
    pub num_arm_dofs: usize,
    pub num_gripper_dofs: usize,
    pub finger_length: f64,
}

impl ArmLayout {
    /// Arm plus gripper DOFs, the length of every command for this arm.
    pub fn num_dofs(&self) -> usize {
        self.num_arm_dofs + self.num_gripper_dofs
    }

    pub fn slot(&self, body: ArmBody) -> BodySlot {
        match body {
            ArmBody::Hand => self.hand,
            ArmBody::LeftFinger => self.left_finger,
            ArmBody::RightFinger => self.right_finger,
            ArmBody::FingertipCentered => self.fingertip_centered,
        }
    }
}

/// Resolved arms plus the topology they were resolved against.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTable {
    topology: SceneTopology,
    arms: Vec<ArmLayout>,
}

impl FrameTable {
    /// Resolves every arm against the topology. Arms keep the order given here,
    /// which is also the order of their commands.
    pub fn build(
        topology: SceneTopology,
        arms: &[ArmDescription],
    ) -> Result<Self, ConfigurationError> {
        let layouts = arms
            .iter()
            .map(|arm| resolve_arm(&topology, arm))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            topology,
            arms: layouts,
        })
    }

    pub fn topology(&self) -> &SceneTopology {
        &self.topology
    }

    pub fn arms(&self) -> &[ArmLayout] {
        &self.arms
    }

    pub fn num_envs(&self) -> usize {
        self.topology.num_envs
    }

    /// Global DOF index of an arm's first DOF in environment `env`.
    pub fn global_dof_offset(&self, env: usize, arm: usize) -> usize {
        env * self.topology.dofs_per_env() + self.arms[arm].dof_offset
    }

    /// Global rigid body index of a named body in environment `env`.
    pub fn global_body_index(&self, env: usize, arm: usize, body: ArmBody) -> usize {
        env * self.topology.bodies_per_env() + self.arms[arm].slot(body).body
    }
}

fn resolve_arm(
    topology: &SceneTopology,
    arm: &ArmDescription,
) -> Result<ArmLayout, ConfigurationError> {
    let actor_index = topology
        .actor_index(&arm.actor)
        .ok_or_else(|| ConfigurationError::UnknownActor(arm.actor.clone()))?;
    let actor = &topology.actors[actor_index];

    let required = arm.num_arm_dofs + arm.num_gripper_dofs;
    if actor.num_dofs() < required {
        return Err(ConfigurationError::DofCount {
            actor: actor.name.clone(),
            expected: required,
            actual: actor.num_dofs(),
        });
    }

    let body_offset = topology.body_offset(actor_index);
    let lookup = |body: ArmBody| -> Result<BodySlot, ConfigurationError> {
        let name = arm.bodies.name(body);
        let local = actor
            .bodies
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| ConfigurationError::UnknownBody {
                actor: actor.name.clone(),
                body: name.to_string(),
            })?;
        if local == 0 {
            return Err(ConfigurationError::BaseBodyHasNoJacobian {
                actor: actor.name.clone(),
                body: name.to_string(),
            });
        }
        Ok(BodySlot {
            body: body_offset + local,
            link: local - 1,
        })
    };

    Ok(ArmLayout {
        actor: actor.name.clone(),
        actor_index,
        hand: lookup(ArmBody::Hand)?,
        left_finger: lookup(ArmBody::LeftFinger)?,
        right_finger: lookup(ArmBody::RightFinger)?,
        fingertip_centered: lookup(ArmBody::FingertipCentered)?,
        dof_offset: topology.dof_offset(actor_index),
        num_actor_bodies: actor.num_bodies(),
        num_actor_dofs: actor.num_dofs(),
        num_arm_dofs: arm.num_arm_dofs,
        num_gripper_dofs: arm.num_gripper_dofs,
        finger_length: arm.finger_length,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A Franka-like actor: base, seven links, hand, two fingers, fingertip body.
    pub(crate) fn franka_actor(name: &str) -> ActorDescription {
        let mut bodies: Vec<String> = (0..8).map(|i| format!("panda_link{i}")).collect();
        bodies.extend(
            [
                "panda_hand",
                "panda_leftfinger",
                "panda_rightfinger",
                "panda_fingertip_centered",
            ]
            .map(String::from),
        );
        let mut dofs: Vec<String> = (1..8).map(|i| format!("panda_joint{i}")).collect();
        dofs.extend(["panda_finger_joint1", "panda_finger_joint2"].map(String::from));
        ActorDescription {
            name: name.to_string(),
            bodies,
            dofs,
        }
    }

    pub(crate) fn prop_actor(name: &str) -> ActorDescription {
        ActorDescription {
            name: name.to_string(),
            bodies: vec![name.to_string()],
            dofs: Vec::new(),
        }
    }

    pub(crate) fn franka_arm(actor: &str) -> ArmDescription {
        ArmDescription {
            actor: actor.to_string(),
            bodies: ArmBodyNames::default(),
            num_arm_dofs: 7,
            num_gripper_dofs: 2,
            finger_length: 0.053,
        }
    }

    pub(crate) fn dual_arm_topology(num_envs: usize) -> SceneTopology {
        SceneTopology {
            num_envs,
            actors: vec![
                franka_actor("franka_0"),
                prop_actor("nut"),
                franka_actor("franka_1"),
                prop_actor("bolt"),
            ],
        }
    }

    #[test]
    fn test_topology_counts() {
        let topology = dual_arm_topology(3);
        assert_eq!(topology.actors_per_env(), 4);
        assert_eq!(topology.bodies_per_env(), 26);
        assert_eq!(topology.dofs_per_env(), 18);
        assert_eq!(topology.body_offset(2), 13);
        assert_eq!(topology.dof_offset(2), 9);
        assert_eq!(topology.dof_offset(3), 18);
        assert_eq!(topology.global_actor_index(2, 1), 9);
    }

    #[test]
    fn test_resolves_both_arms_by_name() {
        let table = FrameTable::build(
            dual_arm_topology(2),
            &[franka_arm("franka_0"), franka_arm("franka_1")],
        )
        .expect("topology contains both arms");

        let first = &table.arms()[0];
        assert_eq!(first.hand, BodySlot { body: 8, link: 7 });
        assert_eq!(first.fingertip_centered, BodySlot { body: 11, link: 10 });
        assert_eq!(first.dof_offset, 0);

        // The nut sits between the arms, so the second hand is at 8 + 12 + 1.
        let second = &table.arms()[1];
        assert_eq!(second.hand, BodySlot { body: 21, link: 7 });
        assert_eq!(second.left_finger.link, 8);
        assert_eq!(second.dof_offset, 9);
        assert_eq!(second.num_dofs(), 9);

        assert_eq!(table.global_dof_offset(1, 1), 18 + 9);
        assert_eq!(table.global_body_index(1, 0, ArmBody::RightFinger), 26 + 10);
    }

    #[test]
    fn test_unknown_names_are_configuration_errors() {
        let topology = dual_arm_topology(1);

        let err = FrameTable::build(topology.clone(), &[franka_arm("franka_7")]).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownActor("franka_7".into()));

        let mut arm = franka_arm("franka_0");
        arm.bodies.hand = "panda_palm".into();
        let err = FrameTable::build(topology.clone(), &[arm]).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownBody { .. }));

        let mut arm = franka_arm("franka_0");
        arm.bodies.hand = "panda_link0".into();
        let err = FrameTable::build(topology, &[arm]).unwrap_err();
        assert!(matches!(err, ConfigurationError::BaseBodyHasNoJacobian { .. }));
    }

    #[test]
    fn test_rejects_actor_with_too_few_dofs() {
        let mut arm = franka_arm("nut");
        arm.bodies = ArmBodyNames {
            hand: "nut".into(),
            left_finger: "nut".into(),
            right_finger: "nut".into(),
            fingertip_centered: "nut".into(),
        };
        let err = FrameTable::build(dual_arm_topology(1), &[arm]).unwrap_err();
        assert!(matches!(err, ConfigurationError::DofCount { expected: 9, actual: 0, .. }));
    }
}
