// tandem_sim/src/simulation/config/resolver.rs

//! Composition of scenario entries from catalog prefabs.
//!
//! A dictionary with a `from = "<namespace>"` key is replaced by the named
//! prefab (itself resolved first), with the dictionary's other keys
//! deep-merged on top. An override that is itself a `from` reference replaces
//! the base value instead of merging into it.

use figment::value::{Dict, Tag, Value};

use super::catalog::PrefabCatalog;
use super::ScenarioError;

/// Nested `from` chains deeper than this are treated as a cycle.
const MAX_PREFAB_DEPTH: usize = 16;

pub fn resolve_actor_value(value: &Value, catalog: &PrefabCatalog) -> Result<Value, ScenarioError> {
    resolve_value_recursively(value, catalog, 0)
}

fn deep_merge(base: &mut Dict, override_dict: &Dict) {
    for (key, override_val) in override_dict {
        if key == "from" {
            continue;
        }

        // A nested reference is a complete replacement, not a merge.
        if let Some(d) = override_val.as_dict() {
            if d.contains_key("from") {
                base.insert(key.clone(), override_val.clone());
                continue;
            }
        }

        if let Some(base_val) = base.get_mut(key) {
            if let (Some(base_sub_dict), Some(override_sub_dict)) =
                (base_val.as_dict(), override_val.as_dict())
            {
                let mut new_sub_dict = base_sub_dict.clone();
                deep_merge(&mut new_sub_dict, override_sub_dict);
                *base_val = Value::Dict(Tag::Default, new_sub_dict);
                continue;
            }
        }
        base.insert(key.clone(), override_val.clone());
    }
}

fn resolve_value_recursively(
    value: &Value,
    catalog: &PrefabCatalog,
    depth: usize,
) -> Result<Value, ScenarioError> {
    if depth > MAX_PREFAB_DEPTH {
        return Err(ScenarioError::Composition(format!(
            "prefab references nest deeper than {MAX_PREFAB_DEPTH} levels; is there a cycle?"
        )));
    }

    // --- 1. Resolve the current node if it's a 'from' reference ---
    let current_node = match value.as_dict() {
        Some(dict) => match dict.get("from") {
            Some(from) => {
                let from_key = from.as_str().ok_or_else(|| {
                    ScenarioError::Composition("'from' must be a string".to_string())
                })?;
                let base_prefab_data = catalog
                    .0
                    .get(from_key)
                    .ok_or_else(|| ScenarioError::UnknownPrefab(from_key.to_string()))?;

                let resolved_base =
                    resolve_value_recursively(base_prefab_data, catalog, depth + 1)?;
                let mut final_dict = resolved_base.into_dict().ok_or_else(|| {
                    ScenarioError::Composition(format!(
                        "prefab '{from_key}' must resolve to a table to be merged"
                    ))
                })?;
                deep_merge(&mut final_dict, dict);
                Value::Dict(Tag::Default, final_dict)
            }
            None => value.clone(),
        },
        None => value.clone(),
    };

    // --- 2. Resolve the children of the result ---
    match &current_node {
        Value::Dict(tag, dict) => {
            let mut new_dict = Dict::new();
            for (key, val) in dict.iter() {
                if key == "from" {
                    continue;
                }
                new_dict.insert(
                    key.clone(),
                    resolve_value_recursively(val, catalog, depth + 1)?,
                );
            }
            Ok(Value::Dict(*tag, new_dict))
        }
        Value::Array(tag, arr) => {
            let resolved = arr
                .iter()
                .map(|item| resolve_value_recursively(item, catalog, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(*tag, resolved))
        }
        _ => Ok(current_node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};
    use figment::Figment;

    fn parse(toml: &str) -> Value {
        Figment::new().merge(Toml::string(toml)).extract().unwrap()
    }

    fn catalog() -> PrefabCatalog {
        let mut catalog = PrefabCatalog::default();
        catalog.0.insert(
            "arms.base".to_string(),
            parse(
                r#"
                kind = "arm"
                armature = 0.1
                [frames]
                hand = "panda_hand"
                left_finger = "panda_leftfinger"
                "#,
            ),
        );
        catalog.0.insert(
            "arms.heavy".to_string(),
            parse(
                r#"
                from = "arms.base"
                armature = 0.5
                "#,
            ),
        );
        catalog
    }

    #[test]
    fn test_from_with_overrides_deep_merges() {
        let entry = parse(
            r#"
            from = "arms.heavy"
            name = "franka_0"
            [frames]
            hand = "panda_palm"
            "#,
        );
        let resolved = resolve_actor_value(&entry, &catalog()).unwrap();
        let dict = resolved.as_dict().unwrap();
        assert_eq!(dict.get("name").and_then(Value::as_str), Some("franka_0"));
        assert_eq!(dict.get("kind").and_then(Value::as_str), Some("arm"));
        assert_eq!(dict.get("armature").and_then(Value::to_f64), Some(0.5));
        assert!(!dict.contains_key("from"));

        let frames = dict.get("frames").and_then(Value::as_dict).unwrap();
        assert_eq!(frames.get("hand").and_then(Value::as_str), Some("panda_palm"));
        // Untouched sibling keys survive the merge.
        assert_eq!(
            frames.get("left_finger").and_then(Value::as_str),
            Some("panda_leftfinger")
        );
    }

    #[test]
    fn test_unknown_prefab_fails() {
        let entry = parse(r#"from = "arms.ur5""#);
        let err = resolve_actor_value(&entry, &catalog()).unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownPrefab(name) if name == "arms.ur5"));
    }

    #[test]
    fn test_self_reference_is_reported_as_composition_error() {
        let mut catalog = catalog();
        catalog
            .0
            .insert("arms.loop".to_string(), parse(r#"from = "arms.loop""#));
        let entry = parse(r#"from = "arms.loop""#);
        assert!(matches!(
            resolve_actor_value(&entry, &catalog),
            Err(ScenarioError::Composition(_))
        ));
    }
}
