//! Persisted enable flags.
//!
//! A small TOML file with one `[main]` table holding the networking and
//! per-radio enable flags. A missing or unreadable file yields defaults (all
//! enabled); a failed write is reported to the caller, which only logs it.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::api::models::RfkillType;

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("failed to write state file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn default_true() -> bool {
    true
}

/// The flags kept across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(rename = "NetworkingEnabled", default = "default_true")]
    pub networking_enabled: bool,
    #[serde(rename = "WirelessEnabled", default = "default_true")]
    pub wireless_enabled: bool,
    #[serde(rename = "WWANEnabled", default = "default_true")]
    pub wwan_enabled: bool,
    #[serde(rename = "WimaxEnabled", default = "default_true")]
    pub wimax_enabled: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            networking_enabled: true,
            wireless_enabled: true,
            wwan_enabled: true,
            wimax_enabled: true,
        }
    }
}

impl PersistedState {
    pub fn radio_enabled(&self, rtype: RfkillType) -> bool {
        match rtype {
            RfkillType::Wlan => self.wireless_enabled,
            RfkillType::Wwan => self.wwan_enabled,
            RfkillType::Wimax => self.wimax_enabled,
        }
    }

    pub fn set_radio_enabled(&mut self, rtype: RfkillType, enabled: bool) {
        match rtype {
            RfkillType::Wlan => self.wireless_enabled = enabled,
            RfkillType::Wwan => self.wwan_enabled = enabled,
            RfkillType::Wimax => self.wimax_enabled = enabled,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    main: PersistedState,
}

/// The state file bound to a path, or an in-memory stand-in without one.
#[derive(Debug, Clone, Default)]
pub struct StateFile {
    path: Option<PathBuf>,
    state: PersistedState,
}

impl StateFile {
    /// Reads the file at `path`, falling back to defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<Document>(&text) {
                Ok(doc) => doc.main,
                Err(e) => {
                    warn!("state file {} is invalid, using defaults: {e}", path.display());
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("state file {} not found, using defaults", path.display());
                PersistedState::default()
            }
            Err(e) => {
                warn!("failed to read state file {}: {e}", path.display());
                PersistedState::default()
            }
        };
        Self {
            path: Some(path),
            state,
        }
    }

    /// A state file that is never written.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Applies `update` and writes the result.
    ///
    /// The in-memory flags change even when the write fails.
    pub fn update(
        &mut self,
        update: impl FnOnce(&mut PersistedState),
    ) -> Result<(), StateFileError> {
        update(&mut self.state);
        self.save()
    }

    fn save(&self) -> Result<(), StateFileError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = toml::to_string(&Document { main: self.state })?;
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::load(dir.path().join("NetworkManager.state"));
        assert_eq!(file.state(), &PersistedState::default());
    }

    #[test]
    fn flags_survive_a_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("NetworkManager.state");
        let mut file = StateFile::load(&path);
        file.update(|s| {
            s.networking_enabled = false;
            s.set_radio_enabled(RfkillType::Wwan, false);
        })
        .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[main]"));
        assert!(text.contains("NetworkingEnabled = false"));
        assert!(text.contains("WWANEnabled = false"));

        let reloaded = StateFile::load(&path);
        assert!(!reloaded.state().networking_enabled);
        assert!(!reloaded.state().radio_enabled(RfkillType::Wwan));
        assert!(reloaded.state().radio_enabled(RfkillType::Wlan));
        assert!(reloaded.state().wimax_enabled);
    }

    #[test]
    fn garbage_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("NetworkManager.state");
        fs::write(&path, "this is = = not toml").unwrap();
        let file = StateFile::load(&path);
        assert!(file.state().networking_enabled);
    }

    #[test]
    fn absent_keys_default_to_enabled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("NetworkManager.state");
        fs::write(&path, "[main]\nWirelessEnabled = false\n").unwrap();
        let file = StateFile::load(&path);
        assert!(!file.state().wireless_enabled);
        assert!(file.state().networking_enabled);
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let mut file = StateFile::load(blocker.join("NetworkManager.state"));
        assert!(file.update(|s| s.networking_enabled = false).is_err());
        assert!(!file.state().networking_enabled);
    }

    #[test]
    fn in_memory_never_writes() {
        let mut file = StateFile::in_memory();
        file.update(|s| s.wimax_enabled = false).unwrap();
        assert!(file.path().is_none());
        assert!(!file.state().wimax_enabled);
    }
}
