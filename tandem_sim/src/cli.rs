// tandem_sim/src/cli.rs

use bevy::prelude::Resource;
use clap::Parser;
use std::path::PathBuf;

/// Tandem: a headless dual-arm controller testbed.
///
/// This struct defines the command-line arguments that can be passed to any
/// binary application that uses the Tandem simulation library.
#[derive(Parser, Debug, Resource, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the scenario TOML file to run.
    #[arg(short, long, default_value = "assets/scenarios/dual_arm_pick.toml")]
    pub scenario: PathBuf,

    /// The root of the prefab catalog that scenario actors reference.
    #[arg(short, long, default_value = "assets/catalog")]
    pub catalog: PathBuf,

    /// Overrides `simulation.episodes` from the scenario.
    #[arg(short, long)]
    pub episodes: Option<usize>,

    /// Overrides `simulation.seed` from the scenario.
    #[arg(long)]
    pub seed: Option<u64>,
}
