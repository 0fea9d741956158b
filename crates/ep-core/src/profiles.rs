//! JSON-backed profile store
//!
//! Holds every connection profile plus the id of the current one. The store
//! always contains at least one profile; loading repairs missing ids and a
//! missing `current` pointer. A file that fails to parse is moved aside to
//! `<name>.bak` before a fresh store is written.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;
use crate::types::{new_profile_id, Profile};

/// Name given to the profile created for an empty store
const DEFAULT_PROFILE_NAME: &str = "Default";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    servers: Vec<Profile>,
    #[serde(default)]
    current: Option<String>,
}

/// Persistent collection of profiles with one marked current
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    data: StoreData,
}

impl ProfileStore {
    /// Load the store from `path`, repairing and saving it when needed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => data,
                Err(e) => {
                    let backup = backup_path(&path);
                    fs::rename(&path, &backup)?;
                    tracing::warn!(
                        "Profile store {:?} is malformed ({}), moved to {:?} and starting fresh",
                        path,
                        e,
                        backup
                    );
                    StoreData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };

        let mut store = Self { path, data };
        if store.repair() {
            store.save()?;
        }
        Ok(store)
    }

    /// Fix up loaded data; returns true if anything changed
    fn repair(&mut self) -> bool {
        let mut dirty = false;

        if self.data.servers.is_empty() {
            let profile = Profile::new(DEFAULT_PROFILE_NAME);
            self.data.current = Some(profile.id.clone());
            self.data.servers.push(profile);
            return true;
        }

        for profile in &mut self.data.servers {
            if profile.id.is_empty() {
                profile.id = new_profile_id();
                dirty = true;
            }
        }

        let current_valid = self
            .data
            .current
            .as_ref()
            .is_some_and(|id| self.data.servers.iter().any(|p| &p.id == id));
        if !current_valid {
            self.data.current = Some(self.data.servers[0].id.clone());
            dirty = true;
        }

        dirty
    }

    /// Path the store is saved to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All profiles in store order
    pub fn profiles(&self) -> &[Profile] {
        &self.data.servers
    }

    fn current_index(&self) -> usize {
        self.data
            .current
            .as_ref()
            .and_then(|id| self.data.servers.iter().position(|p| &p.id == id))
            .unwrap_or(0)
    }

    /// The current profile
    pub fn current(&self) -> &Profile {
        &self.data.servers[self.current_index()]
    }

    /// Find a profile by id, falling back to an exact name match
    pub fn find(&self, key: &str) -> Option<&Profile> {
        self.data
            .servers
            .iter()
            .find(|p| p.id == key)
            .or_else(|| self.data.servers.iter().find(|p| p.name == key))
    }

    /// Make the profile matching `key` current
    pub fn select(&mut self, key: &str) -> Result<&Profile, ProfileError> {
        let id = self
            .find(key)
            .map(|p| p.id.clone())
            .ok_or_else(|| ProfileError::NotFound(key.to_string()))?;
        self.data.current = Some(id);
        self.save()?;
        Ok(self.current())
    }

    /// Replace the stored profile with the same id
    pub fn update(&mut self, profile: Profile) -> Result<(), ProfileError> {
        let slot = self
            .data
            .servers
            .iter_mut()
            .find(|p| p.id == profile.id)
            .ok_or_else(|| ProfileError::NotFound(profile.id.clone()))?;
        *slot = profile;
        self.save()
    }

    /// Copy the current profile under a new id and name, and make it current
    pub fn add(&mut self, name: &str) -> Result<&Profile, ProfileError> {
        let mut profile = self.current().clone();
        profile.id = new_profile_id();
        profile.name = name.to_string();

        self.data.current = Some(profile.id.clone());
        self.data.servers.push(profile);
        self.save()?;
        Ok(self.current())
    }

    /// Remove the current profile; the first remaining one becomes current
    pub fn remove_current(&mut self) -> Result<Profile, ProfileError> {
        if self.data.servers.len() <= 1 {
            return Err(ProfileError::LastProfile);
        }

        let removed = self.data.servers.remove(self.current_index());
        self.data.current = Some(self.data.servers[0].id.clone());
        self.save()?;
        Ok(removed)
    }

    /// Rename the current profile
    pub fn rename_current(&mut self, name: &str) -> Result<(), ProfileError> {
        let index = self.current_index();
        self.data.servers[index].name = name.to_string();
        self.save()
    }

    /// Write the store to disk as pretty JSON
    pub fn save(&self) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Where a store that failed to parse is kept: `<name>.bak` beside it
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoutingMode;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ProfileStore {
        ProfileStore::load(dir.path().join("profiles.json")).unwrap()
    }

    #[test]
    fn test_missing_store_gets_default_profile() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.profiles().len(), 1);
        assert_eq!(store.current().name, DEFAULT_PROFILE_NAME);
        assert_eq!(store.current().listen_address, "127.0.0.1:30000");
        assert!(store.path().exists());
    }

    #[test]
    fn test_malformed_store_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(&path, "{ not json").unwrap();

        let store = ProfileStore::load(&path).unwrap();
        assert_eq!(store.profiles().len(), 1);

        // The unreadable contents are kept aside, never overwritten
        let backup = dir.path().join("profiles.json.bak");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{ not json");
    }

    #[test]
    fn test_routing_case_and_unknown_values_keep_profiles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"servers":[
                {"id":"h","name":"Home","routing":"global"},
                {"id":"w","name":"Work","routing":"Global"},
                {"id":"l","name":"Lab","routing":"split"}
            ],"current":"w"}"#,
        )
        .unwrap();

        let store = ProfileStore::load(&path).unwrap();
        let names: Vec<&str> = store.profiles().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Home", "Work", "Lab"]);
        assert_eq!(store.current().routing_mode, RoutingMode::Global);
        assert_eq!(
            store.find("Lab").unwrap().routing_mode,
            RoutingMode::BypassLocal
        );
        assert!(!dir.path().join("profiles.json.bak").exists());

        let reloaded = ProfileStore::load(&path).unwrap();
        assert_eq!(reloaded.profiles().len(), 3);
    }

    #[test]
    fn test_repair_assigns_ids_and_current() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"servers":[{"name":"a","server":"a.example"},{"name":"b"}],"current":"gone"}"#,
        )
        .unwrap();

        let store = ProfileStore::load(&path).unwrap();
        assert!(store.profiles().iter().all(|p| !p.id.is_empty()));
        assert_eq!(store.current().name, "a");
        assert!(store.current().auto_select_best);

        let reloaded = ProfileStore::load(&path).unwrap();
        assert_eq!(reloaded.current().id, store.current().id);
    }

    #[test]
    fn test_add_clones_current() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let mut first = store.current().clone();
        first.remote_server = "edge.example:443".to_string();
        first.routing_mode = RoutingMode::Global;
        store.update(first.clone()).unwrap();

        let added = store.add("second").unwrap().clone();
        assert_ne!(added.id, first.id);
        assert_eq!(added.name, "second");
        assert_eq!(added.remote_server, "edge.example:443");
        assert_eq!(store.current().id, added.id);
    }

    #[test]
    fn test_select_by_name_and_id() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let first_id = store.current().id.clone();
        store.add("other").unwrap();

        store.select(&first_id).unwrap();
        assert_eq!(store.current().id, first_id);
        store.select("other").unwrap();
        assert_eq!(store.current().name, "other");
        assert!(matches!(
            store.select("missing"),
            Err(ProfileError::NotFound(_))
        ));
    }

    #[test]
    fn test_cannot_remove_last_profile() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert!(matches!(
            store.remove_current(),
            Err(ProfileError::LastProfile)
        ));

        store.add("extra").unwrap();
        let removed = store.remove_current().unwrap();
        assert_eq!(removed.name, "extra");
        assert_eq!(store.profiles().len(), 1);
        assert_eq!(store.current().name, DEFAULT_PROFILE_NAME);
    }

    #[test]
    fn test_rename_persists() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.rename_current("home").unwrap();

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.current().name, "home");
    }

    #[test]
    fn test_update_unknown_profile() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let stray = Profile::new("stray");
        assert!(matches!(store.update(stray), Err(ProfileError::NotFound(_))));
    }
}
