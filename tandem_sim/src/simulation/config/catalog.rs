// tandem_sim/src/simulation/config/catalog.rs

//! The `PrefabCatalog` resource: every `.toml` file under the catalog
//! directory, keyed by its dotted relative path.

use bevy::prelude::*;
use figment::{
    providers::{Format, Toml},
    value::Value,
    Figment,
};
use std::{collections::HashMap, path::Path};
use walkdir::WalkDir;

use super::ScenarioError;

/// The key is a namespace string (e.g., "arms.franka_panda") and the value is
/// the raw, parsed TOML data of that prefab.
#[derive(Resource, Default, Debug, Clone)]
pub struct PrefabCatalog(pub HashMap<String, Value>);

/// Walks `catalog_path`, parses every `.toml` file and keys it by path.
///
/// A missing directory yields an empty catalog; a file that fails to parse is
/// an error, since any scenario referencing it would fail later anyway.
pub fn load_catalog(catalog_path: &Path) -> Result<PrefabCatalog, ScenarioError> {
    let mut catalog = PrefabCatalog::default();
    if !catalog_path.exists() {
        warn!(
            "Catalog directory not found at {:?}, no prefabs will be loaded.",
            catalog_path
        );
        return Ok(catalog);
    }

    info!("Loading prefab catalog from: {:?}", catalog_path);

    for entry in WalkDir::new(catalog_path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            !e.file_type().is_dir() && e.path().extension().is_some_and(|ext| ext == "toml")
        })
    {
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(catalog_path) else {
            continue;
        };
        // Create a key like "arms.franka_panda" from the path.
        let key = relative
            .with_extension("")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, ".");

        let data = Figment::new()
            .merge(Toml::file(path))
            .extract::<Value>()
            .map_err(|source| ScenarioError::Load {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        debug!("Loaded catalog item: '{}'", key);
        catalog.0.insert(key, data);
    }

    info!("Prefab catalog holds {} item(s).", catalog.0.len());
    Ok(catalog)
}
