use crate::command_store::CommandStore;
use crate::fs_util::{read_json_opt, write_json_atomic};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use writingtools_core::builtins::BuiltIn;
use writingtools_core::legacy::{LegacyCustomCommand, convert_legacy_options};

/// Commands saved by versions that predate the unified command list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyState {
    #[serde(default)]
    pub custom_commands: Vec<LegacyCustomCommand>,
}

impl LegacyState {
    /// A missing file means there is nothing to carry over.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Ok(read_json_opt(path)
            .context("read legacy commands")?
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MigrationFlag {
    migrated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub ran: bool,
    pub added_builtins: usize,
    pub added_customs: usize,
}

/// One-shot import of legacy commands into the [`CommandStore`].
#[derive(Debug, Clone)]
pub struct Migrator {
    flag_path: PathBuf,
}

impl Migrator {
    pub fn new(flag_path: impl Into<PathBuf>) -> Self {
        Self {
            flag_path: flag_path.into(),
        }
    }

    pub fn is_migrated(&self) -> anyhow::Result<bool> {
        let flag: Option<MigrationFlag> = read_json_opt(&self.flag_path)?;
        Ok(flag.is_some_and(|f| f.migrated))
    }

    pub fn migrate_if_needed(
        &self,
        store: &CommandStore,
        legacy: &LegacyState,
    ) -> anyhow::Result<MigrationReport> {
        if self.is_migrated()? {
            log::debug!("commands already migrated");
            return Ok(MigrationReport::default());
        }
        self.migrate(store, legacy)
    }

    /// Clears the flag and migrates again. Existing entries are kept.
    pub fn force_migration(
        &self,
        store: &CommandStore,
        legacy: &LegacyState,
    ) -> anyhow::Result<MigrationReport> {
        write_json_atomic(&self.flag_path, &MigrationFlag { migrated: false })?;
        self.migrate(store, legacy)
    }

    fn migrate(&self, store: &CommandStore, legacy: &LegacyState) -> anyhow::Result<MigrationReport> {
        let mut report = MigrationReport {
            ran: true,
            ..Default::default()
        };

        // Built-ins get fresh ids on every conversion, so they are matched by
        // name to keep a re-run from stacking duplicates.
        let existing = store.commands();
        for cmd in convert_legacy_options(&BuiltIn::ALL) {
            let present = existing
                .iter()
                .any(|c| c.is_built_in && c.name.eq_ignore_ascii_case(&cmd.name));
            if !present && store.add(cmd)? {
                report.added_builtins += 1;
            }
        }

        for legacy_cmd in &legacy.custom_commands {
            if store.add(legacy_cmd.clone().into_command())? {
                report.added_customs += 1;
            }
        }

        write_json_atomic(&self.flag_path, &MigrationFlag { migrated: true })?;
        log::info!(
            "migrated commands: {} built-in, {} custom",
            report.added_builtins,
            report.added_customs
        );
        Ok(report)
    }
}
