//! Mirrors the command list into a remote key-value store.
//!
//! The whole list is one blob plus a modification timestamp; the newest
//! timestamp wins. Local edits are pushed after a quiet period, remote
//! changes are applied through [`CommandStore::apply_remote`] while a guard
//! keeps the resulting store event from being pushed straight back.

use crate::command_store::{ChangeOrigin, CommandStore};
use crate::fs_util::{ensure_dir, read_json_opt, write_bytes_atomic, write_json_atomic};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use writingtools_core::command::Command;

pub const COMMANDS_KEY: &str = "writingtools.commands.v1";
pub const MODIFIED_AT_KEY: &str = "writingtools.commands.v1.modified_at";

pub const DEFAULT_PUSH_DEBOUNCE: Duration = Duration::from_millis(1500);

#[async_trait]
pub trait RemoteKeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Writes all entries together.
    async fn set(&self, entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()>;

    /// Fires when another device changed the store, if the backend can tell.
    fn watch(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// One file per key in a directory, for a folder that some other tool syncs.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(writingtools_core::model::sanitize_model_id(key))
    }
}

#[async_trait]
impl RemoteKeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)).context(format!("read remote key {key}")),
        }
    }

    async fn set(&self, entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
        ensure_dir(&self.dir)?;
        for (key, value) in entries {
            write_bytes_atomic(&self.path_for(&key), &value)
                .with_context(|| format!("write remote key {key}"))?;
        }
        Ok(())
    }
}

/// In-process store; `write_from_other_device` simulates a remote edit.
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
    changes: broadcast::Sender<()>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            changes,
        }
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    pub fn write_from_other_device(&self, entries: Vec<(String, Vec<u8>)>) {
        self.lock().extend(entries);
        let _ = self.changes.send(());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("remote store unavailable"))
        }
    }
}

#[async_trait]
impl RemoteKeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
        self.check_available()?;
        self.lock().extend(entries);
        Ok(())
    }

    fn watch(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_local_modified: Option<DateTime<Utc>>,
    pub last_remote_applied: Option<DateTime<Utc>>,
}

impl SyncState {
    fn baseline(&self) -> Option<DateTime<Utc>> {
        self.last_local_modified.max(self.last_remote_applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    NothingRemote,
    UpToDate,
    Applied { commands: usize },
    /// The remote entry could not be decoded and was ignored.
    Discarded,
}

pub struct CloudSync {
    store: Arc<CommandStore>,
    remote: Arc<dyn RemoteKeyValueStore>,
    state_path: PathBuf,
    state: Mutex<SyncState>,
    applying_remote: AtomicBool,
    push_requested: Notify,
    debounce: Duration,
}

impl CloudSync {
    pub fn new(
        store: Arc<CommandStore>,
        remote: Arc<dyn RemoteKeyValueStore>,
        state_path: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let state_path = state_path.into();
        let state: SyncState = read_json_opt(&state_path)
            .context("read sync state")?
            .unwrap_or_default();
        Ok(Self {
            store,
            remote,
            state_path,
            state: Mutex::new(state),
            applying_remote: AtomicBool::new(false),
            push_requested: Notify::new(),
            debounce: DEFAULT_PUSH_DEBOUNCE,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn state(&self) -> SyncState {
        *self.lock_state()
    }

    /// Uploads the current list right away.
    ///
    /// Returns `Ok(false)` when skipped because a remote apply is in progress
    /// or the list could not be encoded.
    pub async fn push_now(&self) -> anyhow::Result<bool> {
        if self.applying_remote.load(Ordering::SeqCst) {
            log::debug!("skipping push while applying a remote change");
            return Ok(false);
        }

        let commands = self.store.commands();
        let blob = match serde_json::to_vec(&commands) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("dropping push: could not encode commands: {e}");
                return Ok(false);
            }
        };

        let ts = self.next_local_timestamp();
        self.remote
            .set(vec![
                (COMMANDS_KEY.to_string(), blob),
                (MODIFIED_AT_KEY.to_string(), ts.to_rfc3339().into_bytes()),
            ])
            .await
            .context("push commands")?;

        self.update_state(|s| s.last_local_modified = Some(ts))?;
        log::info!("pushed {} commands to cloud ({ts})", commands.len());
        Ok(true)
    }

    /// Applies the remote list if it is strictly newer than anything seen locally.
    pub async fn pull(&self) -> anyhow::Result<PullOutcome> {
        let Some(raw_ts) = self
            .remote
            .get(MODIFIED_AT_KEY)
            .await
            .context("read remote timestamp")?
        else {
            return Ok(PullOutcome::NothingRemote);
        };

        let remote_ts = match parse_timestamp(&raw_ts) {
            Some(ts) => ts,
            None => {
                log::warn!("ignoring remote commands: unreadable timestamp");
                return Ok(PullOutcome::Discarded);
            }
        };

        if let Some(baseline) = self.state().baseline() {
            if remote_ts <= baseline {
                log::debug!("remote commands ({remote_ts}) not newer than {baseline}");
                return Ok(PullOutcome::UpToDate);
            }
        }

        let Some(blob) = self
            .remote
            .get(COMMANDS_KEY)
            .await
            .context("read remote commands")?
        else {
            log::warn!("remote timestamp present without a command list");
            return Ok(PullOutcome::Discarded);
        };

        let commands: Vec<Command> = match serde_json::from_slice(&blob) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("ignoring remote commands: {e}");
                return Ok(PullOutcome::Discarded);
            }
        };
        let count = commands.len();

        self.applying_remote.store(true, Ordering::SeqCst);
        let applied = self.store.apply_remote(commands);
        self.applying_remote.store(false, Ordering::SeqCst);
        applied.context("apply remote commands")?;

        self.update_state(|s| s.last_remote_applied = Some(remote_ts))?;
        log::info!("applied {count} commands from cloud ({remote_ts})");
        Ok(PullOutcome::Applied { commands: count })
    }

    /// Requests a push after the debounce period; bursts coalesce into one.
    pub fn schedule_push(&self) {
        if self.applying_remote.load(Ordering::SeqCst) {
            return;
        }
        self.push_requested.notify_one();
    }

    pub async fn on_remote_change(&self) -> anyhow::Result<PullOutcome> {
        self.pull().await
    }

    /// Drives sync until the command store goes away.
    ///
    /// Local store changes and `schedule_push` calls are debounced into
    /// pushes; remote change notifications trigger a pull. Failures are
    /// logged and the loop keeps going.
    pub async fn run(self: Arc<Self>) {
        let mut events = self.store.subscribe();
        let mut remote_changes = self.remote.watch();
        let mut deadline: Option<Instant> = None;

        loop {
            let push_due = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                ev = events.recv() => match ev {
                    Ok(ev) if ev.origin == ChangeOrigin::Local => {
                        if !self.applying_remote.load(Ordering::SeqCst) {
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = self.push_requested.notified() => {
                    deadline = Some(Instant::now() + self.debounce);
                }
                _ = push_due => {
                    deadline = None;
                    if let Err(e) = self.push_now().await {
                        log::warn!("cloud push skipped: {e:#}");
                    }
                }
                changed = next_remote_change(&mut remote_changes) => {
                    if changed {
                        if let Err(e) = self.on_remote_change().await {
                            log::warn!("cloud pull skipped: {e:#}");
                        }
                    }
                }
            }
        }
    }

    // Strictly after anything already recorded, so another device that has
    // seen our last write will treat this one as newer.
    fn next_local_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.state().baseline() {
            Some(prev) if now <= prev => prev + ChronoDuration::milliseconds(1),
            _ => now,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_state(&self, edit: impl FnOnce(&mut SyncState)) -> anyhow::Result<()> {
        let mut state = self.lock_state();
        edit(&mut state);
        write_json_atomic(&self.state_path, &*state).context("write sync state")
    }
}

async fn next_remote_change(rx: &mut Option<broadcast::Receiver<()>>) -> bool {
    let Some(inner) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match inner.recv().await {
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
        Err(broadcast::error::RecvError::Closed) => {
            *rx = None;
            false
        }
    }
}

fn parse_timestamp(raw: &[u8]) -> Option<DateTime<Utc>> {
    let s = std::str::from_utf8(raw).ok()?;
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
