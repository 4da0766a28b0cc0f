use crate::defaults::default_settings;
use crate::fs_util::{read_json_opt, write_json_atomic};
use std::path::{Path, PathBuf};
use writingtools_core::config::Settings;

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Option<Settings>> {
        read_json_opt(&self.path)
    }

    /// A missing file yields the defaults.
    pub fn load_or_default(&self) -> anyhow::Result<Settings> {
        Ok(self.load()?.unwrap_or_else(default_settings))
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        write_json_atomic(&self.path, settings)
    }
}
