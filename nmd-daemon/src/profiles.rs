//! Connection profiles kept as TOML files in a directory.
//!
//! Every `*.toml` file holds one profile. Profiles the daemon creates
//! (generated or added by a client) are written as `<uuid>.toml`.

use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use nmd::ConnectionProfile;
use nmd::backend::{ConnectionStore, SettingsEvent, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    profile: ConnectionProfile,
}

/// Profile store backed by a directory.
///
/// Clones share the loaded profiles, so the host watcher can reload the
/// directory while the manager holds another clone.
#[derive(Debug, Clone)]
pub struct ProfileDir {
    dir: PathBuf,
    entries: Arc<Mutex<Vec<Entry>>>,
}

fn lock(entries: &Mutex<Vec<Entry>>) -> MutexGuard<'_, Vec<Entry>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_dir_profiles(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(read) => read
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    paths.sort();

    let mut entries: Vec<Entry> = Vec::with_capacity(paths.len());
    for path in paths {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to read profile {}: {e}", path.display());
                continue;
            }
        };
        match toml::from_str::<ConnectionProfile>(&text) {
            Ok(profile) if entries.iter().any(|e| e.profile.uuid == profile.uuid) => {
                warn!(
                    "ignoring {}: UUID {} is already used",
                    path.display(),
                    profile.uuid
                );
            }
            Ok(profile) => entries.push(Entry { path, profile }),
            Err(e) => warn!("ignoring invalid profile {}: {e}", path.display()),
        }
    }
    Ok(entries)
}

impl ProfileDir {
    /// Loads every profile in `dir`. A missing directory is an empty store;
    /// it is created on the first write.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        let entries = read_dir_profiles(&dir)?;
        debug!("loaded {} profiles from {}", entries.len(), dir.display());
        Ok(Self {
            dir,
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-reads the directory and reports what changed since the last load.
    ///
    /// Known profiles keep their position; new ones are appended in file
    /// name order.
    pub fn reload(&self) -> io::Result<Vec<SettingsEvent>> {
        let fresh = read_dir_profiles(&self.dir)?;
        let mut entries = lock(&self.entries);
        let mut by_uuid: HashMap<String, Entry> = fresh
            .iter()
            .map(|e| (e.profile.uuid.clone(), e.clone()))
            .collect();

        let mut events = Vec::new();
        let mut kept = Vec::with_capacity(fresh.len());
        for old in entries.drain(..) {
            match by_uuid.remove(&old.profile.uuid) {
                Some(new) => {
                    if new.profile != old.profile {
                        events.push(SettingsEvent::Updated(new.profile.uuid.clone()));
                    }
                    kept.push(new);
                }
                None => events.push(SettingsEvent::Removed(old.profile.uuid)),
            }
        }
        for entry in fresh {
            if by_uuid.remove(&entry.profile.uuid).is_some() {
                events.push(SettingsEvent::Added(entry.profile.uuid.clone()));
                kept.push(entry);
            }
        }
        *entries = kept;
        Ok(events)
    }

    fn write(&self, entry: &Entry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Io(format!("failed to create {}: {e}", self.dir.display()))
        })?;
        let text = toml::to_string(&entry.profile)
            .map_err(|e| StoreError::Invalid(format!("{}: {e}", entry.profile)))?;
        fs::write(&entry.path, text)
            .map_err(|e| StoreError::Io(format!("failed to write {}: {e}", entry.path.display())))
    }
}

impl ConnectionStore for ProfileDir {
    fn connections(&self) -> Vec<ConnectionProfile> {
        lock(&self.entries).iter().map(|e| e.profile.clone()).collect()
    }

    fn add_connection(&mut self, profile: ConnectionProfile) -> Result<(), StoreError> {
        if lock(&self.entries).iter().any(|e| e.profile.uuid == profile.uuid) {
            return Err(StoreError::Duplicate(profile.uuid));
        }
        let entry = Entry {
            path: self.dir.join(format!("{}.toml", profile.uuid)),
            profile,
        };
        self.write(&entry)?;
        debug!("saved {} to {}", entry.profile, entry.path.display());
        lock(&self.entries).push(entry);
        Ok(())
    }

    fn set_timestamp(&mut self, uuid: &str, secs: u64) -> Result<(), StoreError> {
        let entry = {
            let mut entries = lock(&self.entries);
            let entry = entries
                .iter_mut()
                .find(|e| e.profile.uuid == uuid)
                .ok_or_else(|| StoreError::Invalid(format!("no connection {uuid}")))?;
            entry.profile.timestamp = secs;
            entry.clone()
        };
        self.write(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmd::ConnectionType;
    use nmd::builders::ProfileBuilder;

    fn save(dir: &Path, name: &str, profile: &ConnectionProfile) {
        fs::write(dir.join(name), toml::to_string(profile).unwrap()).unwrap();
    }

    #[test]
    fn loads_profiles_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let office = ProfileBuilder::new(ConnectionType::Ethernet, "Office").build();
        let home = ProfileBuilder::new(ConnectionType::Ethernet, "Home").build();
        save(dir.path(), "b-office.toml", &office);
        save(dir.path(), "a-home.toml", &home);
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();
        fs::write(dir.path().join("broken.toml"), "uuid = 3").unwrap();

        let store = ProfileDir::open(dir.path()).unwrap();
        let ids: Vec<String> = store.connections().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["Home", "Office"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileDir::open(dir.path().join("profiles")).unwrap();
        assert!(store.connections().is_empty());
    }

    #[test]
    fn added_profiles_are_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles");
        let mut store = ProfileDir::open(&path).unwrap();
        let profile = ProfileBuilder::new(ConnectionType::Bond, "bond0")
            .interface_name("bond0")
            .build();

        store.add_connection(profile.clone()).unwrap();
        assert_eq!(
            store.add_connection(profile.clone()),
            Err(StoreError::Duplicate(profile.uuid.clone()))
        );
        store.set_timestamp(&profile.uuid, 1_700_000_000).unwrap();

        let reopened = ProfileDir::open(&path).unwrap();
        let loaded = reopened.connection_by_uuid(&profile.uuid).unwrap();
        assert_eq!(loaded.interface_name.as_deref(), Some("bond0"));
        assert_eq!(loaded.timestamp, 1_700_000_000);
    }

    #[test]
    fn reload_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = ProfileBuilder::new(ConnectionType::Ethernet, "First").build();
        let second = ProfileBuilder::new(ConnectionType::Ethernet, "Second").build();
        save(dir.path(), "first.toml", &first);
        save(dir.path(), "second.toml", &second);
        let store = ProfileDir::open(dir.path()).unwrap();
        assert!(store.reload().unwrap().is_empty());

        first.autoconnect = false;
        save(dir.path(), "first.toml", &first);
        fs::remove_file(dir.path().join("second.toml")).unwrap();
        let third = ProfileBuilder::new(ConnectionType::Ethernet, "Third").build();
        save(dir.path(), "0-third.toml", &third);

        let events = store.reload().unwrap();
        assert_eq!(
            events,
            vec![
                SettingsEvent::Updated(first.uuid.clone()),
                SettingsEvent::Removed(second.uuid.clone()),
                SettingsEvent::Added(third.uuid.clone()),
            ]
        );
        let ids: Vec<String> = store.connections().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["First", "Third"]);
    }
}
