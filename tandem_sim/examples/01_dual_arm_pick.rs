// tandem_sim/examples/01_dual_arm_pick.rs

//! Headless dual-arm pick episodes on the kinematic testbed.
//!
//! This example demonstrates how to:
//! 1. Parse the scenario and catalog paths from the command line.
//! 2. Set up a minimal, windowless Bevy application.
//! 3. Add the main `TandemSimulationPlugin`, which runs the whole control loop.
//!
//! To run this example (from the workspace root):
//! `cargo run --example 01_dual_arm_pick -- --episodes 2 --seed 7`

use bevy::{log::LogPlugin, prelude::*, state::app::StatesPlugin};
use clap::Parser;

use tandem_sim::cli::Cli;
use tandem_sim::prelude::AppState;
use tandem_sim::TandemSimulationPlugin;

fn main() -> AppExit {
    // --- 1. Parse Command-Line Arguments ---
    let cli = Cli::parse();

    let mut app = App::new();

    // --- 2. Add Core Bevy Plugins & Resources ---
    app.add_plugins((
        // No window and no renderer: the update loop runs as fast as it can.
        MinimalPlugins,
        StatesPlugin,
        LogPlugin {
            level: bevy::log::Level::INFO,
            filter: "info,tandem_sim=debug,tandem_core=debug".to_string(),
            ..default()
        },
    ))
    // The config plugin reads the scenario and catalog paths from here.
    .insert_resource(cli);

    app.init_state::<AppState>();

    // --- 3. Add the Main Tandem Simulation Plugin ---
    app.add_plugins(TandemSimulationPlugin);

    // --- 4. Run the App ---
    // Exits once the scripted episodes are done.
    app.run()
}
