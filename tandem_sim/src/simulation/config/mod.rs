// tandem_sim/src/simulation/config/mod.rs

//! This module handles loading, resolving, and validating all simulation
//! configuration from disk, including the prefab catalog system.

mod catalog;
mod resolver;

pub mod structs;

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::Deserialize;
use tandem_core::error::{ConfigurationError, ControlError};
use tandem_core::frames::layout::SceneTopology;
use thiserror::Error;

use crate::cli::Cli;
use crate::prelude::AppState;
pub use catalog::{load_catalog, PrefabCatalog};
pub use resolver::resolve_actor_value;
pub use structs::{ActorConfig, ArmConfig, PropConfig, ScenarioConfig};

/// Anything that can go wrong between reading a scenario file and holding a
/// runnable scene. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("prefab '{0}' not found in catalog")]
    UnknownPrefab(String),

    #[error("invalid prefab composition: {0}")]
    Composition(String),

    #[error("actor entry {index} is not a valid arm or prop: {source}")]
    Actor {
        index: usize,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app
            // The resource for the raw, unresolved catalog data.
            .init_resource::<PrefabCatalog>()
            // A resource to hold the final, resolved actor configurations.
            .init_resource::<ResolvedActors>()
            .add_systems(
                OnEnter(AppState::AssetLoading),
                (
                    load_catalog_from_disk,
                    load_and_resolve_scenario,
                    transition_to_scene_building,
                )
                    .chain(),
            );
    }
}

/// Resolved actors in creation order. Arms keep this order everywhere
/// downstream: frame table, commands and episode goals.
#[derive(Resource, Default, Debug, Clone)]
pub struct ResolvedActors(pub Vec<ActorConfig>);

impl ResolvedActors {
    pub fn arms(&self) -> impl Iterator<Item = &ArmConfig> {
        self.0.iter().filter_map(|actor| match actor {
            ActorConfig::Arm(arm) => Some(arm),
            ActorConfig::Prop(_) => None,
        })
    }

    pub fn topology(&self, num_envs: usize) -> SceneTopology {
        SceneTopology {
            num_envs,
            actors: self.0.iter().map(ActorConfig::description).collect(),
        }
    }
}

/// Reads a scenario file. Actor entries are left unresolved.
pub fn load_scenario(path: &Path) -> Result<ScenarioConfig, ScenarioError> {
    info!("Loading scenario from: {:?}", path);
    Figment::new()
        .merge(Toml::file(path))
        .extract()
        .map_err(|source| ScenarioError::Load {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
}

/// Resolves every actor entry against the catalog and checks the result.
pub fn resolve_actors(
    scenario: &ScenarioConfig,
    catalog: &PrefabCatalog,
) -> Result<ResolvedActors, ScenarioError> {
    let mut actors = Vec::with_capacity(scenario.actors.len());
    for (index, value) in scenario.actors.iter().enumerate() {
        let resolved = resolve_actor_value(value, catalog)?;
        let actor = ActorConfig::deserialize(&resolved).map_err(|source| ScenarioError::Actor {
            index,
            source: Box::new(source),
        })?;
        actor.validate()?;
        info!("Resolved actor '{}'", actor.name());
        actors.push(actor);
    }

    for (i, actor) in actors.iter().enumerate() {
        if actors[..i].iter().any(|other| other.name() == actor.name()) {
            return Err(ScenarioError::Invalid(format!(
                "actor name '{}' is used twice",
                actor.name()
            )));
        }
    }
    if !actors.iter().any(|a| matches!(a, ActorConfig::Arm(_))) {
        return Err(ScenarioError::Invalid("scenario contains no arms".to_string()));
    }
    Ok(ResolvedActors(actors))
}

/// Loads the scenario and catalog and resolves the actors in one go.
pub fn load_resolved_scenario(
    scenario_path: &Path,
    catalog_path: &Path,
) -> Result<(ScenarioConfig, ResolvedActors), ScenarioError> {
    let catalog = load_catalog(catalog_path)?;
    let scenario = load_scenario(scenario_path)?;
    let actors = resolve_actors(&scenario, &catalog)?;
    Ok((scenario, actors))
}

fn load_catalog_from_disk(cli: Res<Cli>, mut catalog: ResMut<PrefabCatalog>) -> Result {
    *catalog = load_catalog(&cli.catalog)?;
    Ok(())
}

fn load_and_resolve_scenario(
    mut commands: Commands,
    cli: Res<Cli>,
    catalog: Res<PrefabCatalog>,
    mut resolved_actors: ResMut<ResolvedActors>,
) -> Result {
    let mut scenario = load_scenario(&cli.scenario)?;

    // Command-line overrides win over the file.
    if let Some(episodes) = cli.episodes {
        scenario.simulation.episodes = episodes;
    }
    if let Some(seed) = cli.seed {
        scenario.simulation.seed = Some(seed);
    }

    *resolved_actors = resolve_actors(&scenario, &catalog)?;
    commands.insert_resource(scenario);
    Ok(())
}

fn transition_to_scene_building(mut next_state: ResMut<NextState<AppState>>) {
    info!("Configuration loading and resolution complete. Transitioning to SceneBuilding state.");
    next_state.set(AppState::SceneBuilding);
}
