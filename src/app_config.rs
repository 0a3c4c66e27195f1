//! Per-application logging preferences (filter levels and appenders),
//! shared with producer-side tooling through a JSON file. The pipeline
//! core never reads this store; the operator menu edits it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Preferences for one application id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub appenders: Vec<String>,
}

/// Handle to the on-disk store. Readers and writers of the same handle
/// are mutually excluded; writes replace the file atomically.
pub struct AppConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AppConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Preferences for `app_id`, or `None` when the application has no
    /// entry. A missing store file reads as empty.
    pub fn get(&self, app_id: u32) -> Result<Option<AppConfig>> {
        let _guard = self.lock.lock();
        let apps = load_store(&self.path)?;
        Ok(apps.get(&entry_key(app_id)).cloned())
    }

    /// Create or replace the entry for `app_id`.
    pub fn update(&self, app_id: u32, filters: Vec<String>, appenders: Vec<String>) -> Result<()> {
        let _guard = self.lock.lock();
        let mut apps = load_store(&self.path)?;
        apps.insert(entry_key(app_id), AppConfig { filters, appenders });
        save_store(&self.path, &apps)
    }
}

fn entry_key(app_id: u32) -> String {
    format!("app_{app_id}")
}

fn load_store(path: &Path) -> Result<BTreeMap<String, AppConfig>> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err).context("reading app config store"),
    };
    serde_json::from_slice(&data).context("parsing app config store")
}

fn save_store(path: &Path, apps: &BTreeMap<String, AppConfig>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("creating app config directory")?;
    }
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(apps).context("serializing app config store")?;
    fs::write(&tmp, data).context("writing temp app config store")?;
    fs::rename(&tmp, path).context("replacing app config store")?;
    Ok(())
}
