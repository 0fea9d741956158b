//! Profile command implementations

use std::path::Path;

use anyhow::Result;

use crate::output::{format_profile, format_profiles, print_success};
use ep_core::{ProfileError, ProfileStore};

/// List every profile, marking the current one
pub fn profile_list(profiles_path: &Path, json: bool) -> Result<()> {
    let store = ProfileStore::load(profiles_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(store.profiles())?);
    } else {
        println!("{}", format_profiles(store.profiles(), &store.current().id));
    }
    Ok(())
}

/// Show one profile, the current one by default
pub fn profile_show(profiles_path: &Path, key: Option<&str>) -> Result<()> {
    let store = ProfileStore::load(profiles_path)?;
    let profile = match key {
        Some(key) => store
            .find(key)
            .ok_or_else(|| ProfileError::NotFound(key.to_string()))?,
        None => store.current(),
    };
    println!("{}", format_profile(profile));
    Ok(())
}

/// Make a profile current
pub fn profile_use(profiles_path: &Path, key: &str) -> Result<()> {
    let mut store = ProfileStore::load(profiles_path)?;
    let profile = store.select(key)?;
    print_success(&format!("Switched to profile '{}'", profile.name));
    Ok(())
}

/// Copy the current profile under a new name
pub fn profile_add(profiles_path: &Path, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Profile name cannot be empty");
    }
    let mut store = ProfileStore::load(profiles_path)?;
    let profile = store.add(name)?;
    print_success(&format!("Added profile '{}' ({})", profile.name, profile.id));
    Ok(())
}

/// Remove the current profile
pub fn profile_remove(profiles_path: &Path) -> Result<()> {
    let mut store = ProfileStore::load(profiles_path)?;
    let removed = store.remove_current()?;
    print_success(&format!(
        "Removed profile '{}'; '{}' is now current",
        removed.name,
        store.current().name
    ));
    Ok(())
}

/// Rename the current profile
pub fn profile_rename(profiles_path: &Path, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Profile name cannot be empty");
    }
    let mut store = ProfileStore::load(profiles_path)?;
    let old = store.current().name.clone();
    store.rename_current(name)?;
    print_success(&format!("Renamed profile '{}' to '{}'", old, name));
    Ok(())
}

/// Set one field of the current profile
///
/// `ip_list` values use `\n` or `,` to separate endpoints.
pub fn profile_set(profiles_path: &Path, field: &str, value: &str) -> Result<()> {
    let mut store = ProfileStore::load(profiles_path)?;
    let mut profile = store.current().clone();

    let value = if field == "ip_list" {
        value.replace("\\n", "\n").replace(',', "\n")
    } else {
        value.to_string()
    };
    profile.set_field(field, &value)?;
    store.update(profile)?;

    let shown = if field == "token" { "****" } else { value.as_str() };
    print_success(&format!("Set {} = {}", field, shown.replace('\n', ", ")));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_endpoint_list_splits_commas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");

        profile_set(&path, "ip_list", "a.example, b.example:8443").unwrap();

        let store = ProfileStore::load(&path).unwrap();
        assert_eq!(
            ep_probe::parse_candidates(&store.current().endpoint_list),
            vec!["a.example", "b.example:8443"]
        );
    }

    #[test]
    fn test_add_use_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");

        profile_add(&path, "work").unwrap();
        profile_use(&path, "Default").unwrap();
        assert_eq!(ProfileStore::load(&path).unwrap().current().name, "Default");

        profile_remove(&path).unwrap();
        let store = ProfileStore::load(&path).unwrap();
        assert_eq!(store.profiles().len(), 1);
        assert_eq!(store.current().name, "work");

        assert!(profile_remove(&path).is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        assert!(profile_set(&path, "colour", "blue").is_err());
        assert!(profile_add(&path, "  ").is_err());
    }
}
