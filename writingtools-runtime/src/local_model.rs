//! Lifecycle of the on-device model: check, download, load, infer, delete.
//!
//! One descriptor is selected at a time. Status is published on a watch
//! channel; every long step is tagged with an operation id so a superseded
//! download or load can never overwrite the state of whatever replaced it.
//! Downloads land in a per-operation staging directory that is renamed into
//! place only once every file is present, so the storage directory is either
//! absent or complete.

use crate::downloader::{DownloadProgress, WeightsSource};
use crate::fs_util::{dir_is_empty, remove_dir_if_exists};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use writingtools_core::model::LocalModelDescriptor;
use writingtools_core::types::{ChatMessage, ImageAttachment};
use writingtools_engine::cancel::{CancelToken, Canceller};
use writingtools_engine::error::ProviderError;

pub const MAX_RETRIES: u32 = 3;

// Each pass of `ensure_loaded` advances at least one state.
const MAX_ENSURE_STEPS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Checking,
    NeedsDownload,
    Downloading,
    Downloaded,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub parameter_count: Option<u64>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalModelStatus {
    pub descriptor_id: String,
    pub state: LifecycleState,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub info: Option<ModelInfo>,
}

impl LocalModelStatus {
    fn fresh(descriptor_id: &str) -> Self {
        Self {
            descriptor_id: descriptor_id.to_string(),
            state: LifecycleState::Idle,
            progress: None,
            error: None,
            retry_count: 0,
            info: None,
        }
    }
}

/// Weights resident in memory.
#[async_trait]
pub trait LoadedModel: Send + Sync {
    fn info(&self) -> ModelInfo;

    async fn generate(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        images: &[ImageAttachment],
        token: &CancelToken,
    ) -> Result<String, ProviderError>;
}

/// Native inference runtime binding.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Whether this host can run the engine at all. Checked before any
    /// download or load.
    fn is_supported(&self) -> bool {
        true
    }

    async fn load(
        &self,
        descriptor: &LocalModelDescriptor,
        dir: &Path,
    ) -> Result<Arc<dyn LoadedModel>, ProviderError>;
}

/// For builds without a native runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedEngine;

#[async_trait]
impl InferenceEngine for UnsupportedEngine {
    fn is_supported(&self) -> bool {
        false
    }

    async fn load(
        &self,
        _descriptor: &LocalModelDescriptor,
        _dir: &Path,
    ) -> Result<Arc<dyn LoadedModel>, ProviderError> {
        Err(ProviderError::PlatformUnsupported)
    }
}

struct Slot {
    descriptor: LocalModelDescriptor,
    download: Option<(u64, Canceller)>,
    loading: Option<u64>,
    loaded: Option<Arc<dyn LoadedModel>>,
}

struct Inner {
    models_dir: PathBuf,
    catalog: Vec<LocalModelDescriptor>,
    source: Arc<dyn WeightsSource>,
    engine: Arc<dyn InferenceEngine>,
    slot: Mutex<Slot>,
    status: watch::Sender<LocalModelStatus>,
    // Held for the whole of one inference; the exclusive compute resource.
    inference: tokio::sync::Mutex<()>,
    next_op: AtomicU64,
}

#[derive(Clone)]
pub struct LocalModelManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalModelManager")
            .field("models_dir", &self.inner.models_dir)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

/// Resets a download or load whose future was dropped before it finished.
struct OpGuard {
    inner: Arc<Inner>,
    op: u64,
    staging: Option<PathBuf>,
    armed: bool,
}

impl OpGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.inner.lock_slot();
        let mut reset_to = None;
        if slot.download.as_ref().is_some_and(|(op, _)| *op == self.op) {
            slot.download = None;
            reset_to = Some(LifecycleState::NeedsDownload);
        }
        if slot.loading == Some(self.op) {
            slot.loading = None;
            reset_to = Some(LifecycleState::Downloaded);
        }
        if let Some(staging) = &self.staging {
            let _ = std::fs::remove_dir_all(staging);
        }
        if let Some(state) = reset_to {
            log::info!("local model operation {} abandoned", self.op);
            self.inner.status.send_modify(|s| {
                s.state = state;
                s.progress = None;
            });
        }
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn storage_dir(&self, descriptor: &LocalModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.sanitized_id())
    }

    fn staging_dir(&self, descriptor: &LocalModelDescriptor, op: u64) -> PathBuf {
        self.models_dir
            .join(format!(".staging-{}-{op}", descriptor.sanitized_id()))
    }

    fn transition(&self, state: LifecycleState) {
        log::info!("local model: {state:?}");
        self.status.send_modify(|s| s.state = state);
    }
}

impl LocalModelManager {
    pub fn new(
        models_dir: impl Into<PathBuf>,
        catalog: Vec<LocalModelDescriptor>,
        selected_id: &str,
        source: Arc<dyn WeightsSource>,
        engine: Arc<dyn InferenceEngine>,
    ) -> anyhow::Result<Self> {
        let descriptor = catalog
            .iter()
            .find(|d| d.id == selected_id)
            .or_else(|| catalog.first())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("local model catalog is empty"))?;
        if descriptor.id != selected_id {
            log::warn!(
                "unknown local model {selected_id:?}; using {}",
                descriptor.id
            );
        }
        let (status, _) = watch::channel(LocalModelStatus::fresh(&descriptor.id));
        Ok(Self {
            inner: Arc::new(Inner {
                models_dir: models_dir.into(),
                catalog,
                source,
                engine,
                slot: Mutex::new(Slot {
                    descriptor,
                    download: None,
                    loading: None,
                    loaded: None,
                }),
                status,
                inference: tokio::sync::Mutex::new(()),
                next_op: AtomicU64::new(1),
            }),
        })
    }

    pub fn catalog(&self) -> &[LocalModelDescriptor] {
        &self.inner.catalog
    }

    pub fn descriptor(&self) -> LocalModelDescriptor {
        self.inner.lock_slot().descriptor.clone()
    }

    pub fn state(&self) -> LocalModelStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocalModelStatus> {
        self.inner.status.subscribe()
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.inner.storage_dir(&self.descriptor())
    }

    fn require_supported(&self) -> Result<(), ProviderError> {
        if self.inner.engine.is_supported() {
            Ok(())
        } else {
            log::warn!("local model: no inference runtime on this platform");
            Err(ProviderError::PlatformUnsupported)
        }
    }

    fn next_op(&self) -> u64 {
        self.inner.next_op.fetch_add(1, Ordering::SeqCst)
    }

    /// Switches to another descriptor, abandoning everything about the current one.
    pub async fn select(&self, id: &str) -> Result<(), ProviderError> {
        let descriptor = self
            .inner
            .catalog
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::ModelUnavailable(format!("unknown model {id}")))?;
        {
            let mut slot = self.inner.lock_slot();
            if let Some((_, canceller)) = slot.download.take() {
                canceller.cancel();
            }
            slot.loading = None;
            slot.loaded = None;
            slot.descriptor = descriptor;
        }
        log::info!("local model selected: {id}");
        self.inner.status.send_replace(LocalModelStatus::fresh(id));
        self.check_status().await;
        Ok(())
    }

    /// Re-derives the state from disk. Leaves in-flight downloads and loads alone.
    pub async fn check_status(&self) -> LocalModelStatus {
        let (descriptor, loaded) = {
            let slot = self.inner.lock_slot();
            if slot.download.is_some() || slot.loading.is_some() {
                return self.state();
            }
            (slot.descriptor.clone(), slot.loaded.is_some())
        };
        self.inner.transition(LifecycleState::Checking);

        let dir = self.inner.storage_dir(&descriptor);
        let next = if !dir.exists() {
            LifecycleState::NeedsDownload
        } else {
            match dir_is_empty(&dir) {
                Ok(true) => {
                    if let Err(e) = remove_dir_if_exists(&dir) {
                        log::warn!("failed to remove empty model dir: {e:#}");
                    }
                    LifecycleState::NeedsDownload
                }
                Ok(false) if loaded => LifecycleState::Loaded,
                Ok(false) => LifecycleState::Downloaded,
                Err(e) => {
                    log::warn!("failed to inspect model dir: {e:#}");
                    LifecycleState::NeedsDownload
                }
            }
        };

        let slot = self.inner.lock_slot();
        // A select or start that raced the check wins.
        if slot.descriptor.id == descriptor.id && slot.download.is_none() && slot.loading.is_none()
        {
            self.inner.transition(next);
        }
        drop(slot);
        self.state()
    }

    /// Downloads the selected weights and loads them. A no-op unless the
    /// state allows starting.
    pub async fn start_download(&self) -> Result<(), ProviderError> {
        self.download(false).await
    }

    /// Another attempt after a failure, bounded by [`MAX_RETRIES`].
    pub async fn retry(&self) -> Result<(), ProviderError> {
        let status = self.state();
        if status.state != LifecycleState::Error {
            return Ok(());
        }
        if status.retry_count >= MAX_RETRIES {
            return Err(ProviderError::ModelUnavailable(format!(
                "gave up after {MAX_RETRIES} retries: {}",
                status.error.unwrap_or_default()
            )));
        }
        self.download(true).await
    }

    async fn download(&self, is_retry: bool) -> Result<(), ProviderError> {
        self.require_supported()?;
        let op = self.next_op();
        let canceller = Canceller::new();
        let token = canceller.token();
        let descriptor = {
            let mut slot = self.inner.lock_slot();
            let state = self.inner.status.borrow().state;
            let can_start = matches!(
                state,
                LifecycleState::NeedsDownload
                    | LifecycleState::Error
                    | LifecycleState::Idle
                    | LifecycleState::Checking
            );
            if slot.download.is_some() || slot.loading.is_some() || !can_start {
                log::debug!("download not started in state {state:?}");
                return Ok(());
            }
            slot.download = Some((op, canceller));
            self.inner.status.send_modify(|s| {
                s.state = LifecycleState::Downloading;
                s.progress = Some(0.0);
                s.error = None;
                if is_retry {
                    s.retry_count += 1;
                }
            });
            slot.descriptor.clone()
        };
        log::info!("local model: downloading {}", descriptor.id);

        let staging = self.inner.staging_dir(&descriptor, op);
        let guard = OpGuard {
            inner: self.inner.clone(),
            op,
            staging: Some(staging.clone()),
            armed: true,
        };

        let result = self.fetch_into(&descriptor, &staging, op, &token).await;
        let result = match result {
            Ok(()) => self.install(&descriptor, &staging, op),
            Err(e) => Err(e),
        };

        let model = match result {
            Ok(()) => {
                // Download implies load for this backend.
                self.inner
                    .engine
                    .load(&descriptor, &self.inner.storage_dir(&descriptor))
                    .await
            }
            Err(e) => Err(e),
        };

        guard.disarm();
        let _ = std::fs::remove_dir_all(&staging);
        let mut slot = self.inner.lock_slot();
        let current = slot.download.as_ref().is_some_and(|(o, _)| *o == op);
        if current {
            slot.download = None;
        }
        match model {
            Ok(model) => {
                if !current {
                    return Err(ProviderError::Cancelled);
                }
                let info = model.info();
                slot.loaded = Some(model);
                self.inner.status.send_modify(|s| {
                    s.state = LifecycleState::Loaded;
                    s.progress = None;
                    s.error = None;
                    s.retry_count = 0;
                    s.info = Some(info);
                });
                log::info!("local model: loaded {}", descriptor.id);
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                if current {
                    self.inner.status.send_modify(|s| {
                        s.state = LifecycleState::NeedsDownload;
                        s.progress = None;
                        s.error = None;
                    });
                }
                log::info!("local model: download of {} cancelled", descriptor.id);
                Err(ProviderError::Cancelled)
            }
            Err(e) => {
                if current {
                    let message = e.to_string();
                    self.inner.status.send_modify(|s| {
                        s.state = LifecycleState::Error;
                        s.progress = None;
                        s.error = Some(message);
                    });
                }
                log::warn!("local model: download of {} failed: {e}", descriptor.id);
                Err(e)
            }
        }
    }

    async fn fetch_into(
        &self,
        descriptor: &LocalModelDescriptor,
        staging: &Path,
        op: u64,
        token: &CancelToken,
    ) -> Result<(), ProviderError> {
        remove_dir_if_exists(staging)
            .and_then(|()| crate::fs_util::ensure_dir(staging))
            .map_err(|e| ProviderError::ModelUnavailable(format!("{e:#}")))?;

        let inner = &self.inner;
        let progress = |p: DownloadProgress| {
            if token.is_cancelled() {
                return;
            }
            let slot = inner.lock_slot();
            if slot.download.as_ref().is_some_and(|(o, _)| *o == op) {
                inner.status.send_modify(|s| s.progress = p.fraction().or(s.progress));
            }
        };
        inner
            .source
            .fetch(descriptor, staging, token, &progress)
            .await?;
        token.check()
    }

    fn install(
        &self,
        descriptor: &LocalModelDescriptor,
        staging: &Path,
        op: u64,
    ) -> Result<(), ProviderError> {
        // Holding the slot lock keeps a concurrent cancel from observing a half-installed dir.
        let slot = self.inner.lock_slot();
        if !slot.download.as_ref().is_some_and(|(o, _)| *o == op) {
            return Err(ProviderError::Cancelled);
        }
        let dir = self.inner.storage_dir(descriptor);
        remove_dir_if_exists(&dir)
            .and_then(|()| {
                std::fs::rename(staging, &dir)
                    .map_err(|e| anyhow::anyhow!("install {}: {e}", dir.display()))
            })
            .map_err(|e| ProviderError::ModelUnavailable(format!("{e:#}")))
    }

    /// Stops the in-flight download; the state returns to `NeedsDownload` at once.
    pub fn cancel_download(&self) {
        let mut slot = self.inner.lock_slot();
        if let Some((op, canceller)) = slot.download.take() {
            canceller.cancel();
            log::info!("local model: cancelling download {op}");
            self.inner.status.send_modify(|s| {
                s.state = LifecycleState::NeedsDownload;
                s.progress = None;
                s.error = None;
            });
        }
    }

    /// Loads weights already on disk. No network I/O.
    pub async fn load(&self) -> Result<(), ProviderError> {
        self.require_supported()?;
        let op = self.next_op();
        let descriptor = {
            let mut slot = self.inner.lock_slot();
            let state = self.inner.status.borrow().state;
            match state {
                LifecycleState::Loaded if slot.loaded.is_some() => return Ok(()),
                LifecycleState::Downloaded => {}
                _ => {
                    return Err(ProviderError::ModelUnavailable(format!(
                        "cannot load while {state:?}"
                    )));
                }
            }
            if slot.loading.is_some() {
                return Ok(());
            }
            slot.loading = Some(op);
            self.inner.transition(LifecycleState::Loading);
            slot.descriptor.clone()
        };
        let guard = OpGuard {
            inner: self.inner.clone(),
            op,
            staging: None,
            armed: true,
        };

        let result = self
            .inner
            .engine
            .load(&descriptor, &self.inner.storage_dir(&descriptor))
            .await;
        guard.disarm();

        let mut slot = self.inner.lock_slot();
        if slot.loading != Some(op) {
            return Err(ProviderError::Cancelled);
        }
        slot.loading = None;
        match result {
            Ok(model) => {
                let info = model.info();
                slot.loaded = Some(model);
                self.inner.status.send_modify(|s| {
                    s.state = LifecycleState::Loaded;
                    s.error = None;
                    s.retry_count = 0;
                    s.info = Some(info);
                });
                log::info!("local model: loaded {}", descriptor.id);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.inner.status.send_modify(|s| {
                    s.state = LifecycleState::Error;
                    s.error = Some(message);
                });
                log::warn!("local model: load of {} failed: {e}", descriptor.id);
                Err(e)
            }
        }
    }

    /// Removes the weights. Refused while downloading, loading or generating.
    pub async fn delete(&self) -> Result<(), ProviderError> {
        let _inference = self.inner.inference.try_lock().map_err(|_| {
            ProviderError::ResourceBusy("the local model is generating".into())
        })?;
        let dir = {
            let mut slot = self.inner.lock_slot();
            if slot.download.is_some() || slot.loading.is_some() {
                return Err(ProviderError::ResourceBusy(
                    "the local model is downloading or loading".into(),
                ));
            }
            slot.loaded = None;
            self.inner.storage_dir(&slot.descriptor)
        };
        remove_dir_if_exists(&dir).map_err(|e| ProviderError::ModelUnavailable(format!("{e:#}")))?;
        log::info!("local model: deleted {}", dir.display());
        self.inner.status.send_modify(|s| {
            s.info = None;
            s.error = None;
            s.progress = None;
            s.retry_count = 0;
        });
        self.check_status().await;
        Ok(())
    }

    /// Drives the lifecycle until the model is resident.
    ///
    /// After an error, weights already on disk are loaded again without
    /// touching the network; missing weights go through [`Self::retry`].
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn LoadedModel>, ProviderError> {
        self.require_supported()?;
        let mut status_rx = self.subscribe();
        for _ in 0..MAX_ENSURE_STEPS {
            if let Some(model) = self.loaded_model() {
                return Ok(model);
            }
            let state = self.state().state;
            match state {
                LifecycleState::Idle | LifecycleState::Checking | LifecycleState::Loaded => {
                    self.check_status().await;
                }
                LifecycleState::NeedsDownload => self.start_download().await?,
                LifecycleState::Error => match dir_is_empty(&self.storage_dir()) {
                    Ok(false) => {
                        self.check_status().await;
                    }
                    _ => self.retry().await?,
                },
                LifecycleState::Downloaded => self.load().await?,
                LifecycleState::Downloading | LifecycleState::Loading => {
                    while matches!(
                        status_rx.borrow().state,
                        LifecycleState::Downloading | LifecycleState::Loading
                    ) {
                        if status_rx.changed().await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        self.loaded_model().ok_or_else(|| {
            let status = self.state();
            ProviderError::ModelUnavailable(
                status
                    .error
                    .unwrap_or_else(|| format!("model not ready ({:?})", status.state)),
            )
        })
    }

    fn loaded_model(&self) -> Option<Arc<dyn LoadedModel>> {
        let slot = self.inner.lock_slot();
        let loaded = self.inner.status.borrow().state == LifecycleState::Loaded;
        slot.loaded.clone().filter(|_| loaded)
    }

    /// Runs one inference, waiting for any other to finish first.
    pub async fn generate(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        images: &[ImageAttachment],
        token: &CancelToken,
    ) -> Result<String, ProviderError> {
        let _exclusive = tokio::select! {
            _ = token.cancelled() => return Err(ProviderError::Cancelled),
            g = self.inner.inference.lock() => g,
        };
        token.check()?;
        let model = self.ensure_loaded().await?;
        tokio::select! {
            _ = token.cancelled() => Err(ProviderError::Cancelled),
            out = model.generate(system, messages, images, token) => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;
    use writingtools_core::model::ModelFile;

    fn descriptor(id: &str) -> LocalModelDescriptor {
        LocalModelDescriptor {
            id: id.into(),
            display_name: id.into(),
            vision: false,
            files: vec![ModelFile {
                name: "weights.bin".into(),
                url: "https://example.invalid/weights.bin".into(),
                sha256: None,
                size_bytes: Some(4),
            }],
        }
    }

    /// Writes one file in four progress steps; can be held open with a gate.
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        failures_left: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl WeightsSource for FakeSource {
        async fn fetch(
            &self,
            descriptor: &LocalModelDescriptor,
            dest: &Path,
            token: &CancelToken,
            progress: crate::downloader::ProgressFn<'_>,
        ) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProviderError::Transport("connection reset".into()));
            }
            for i in 1..=4u64 {
                if let Some(gate) = &self.gate {
                    tokio::select! {
                        _ = token.cancelled() => return Err(ProviderError::Cancelled),
                        _ = gate.notified() => {}
                    }
                }
                token.check()?;
                progress(DownloadProgress {
                    downloaded_bytes: i,
                    total_bytes: descriptor.expected_bytes(),
                });
            }
            std::fs::write(dest.join("weights.bin"), b"abcd")
                .map_err(|e| ProviderError::ModelUnavailable(e.to_string()))
        }
    }

    struct FakeModel {
        running: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LoadedModel for FakeModel {
        fn info(&self) -> ModelInfo {
            ModelInfo {
                parameter_count: Some(3_000_000_000),
                size_bytes: Some(4),
            }
        }

        async fn generate(
            &self,
            _system: Option<&str>,
            messages: &[ChatMessage],
            _images: &[ImageAttachment],
            _token: &CancelToken,
        ) -> Result<String, ProviderError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("echo: {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
        }
    }

    #[derive(Default)]
    struct FakeEngine {
        broken: bool,
        loads: AtomicUsize,
        running: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InferenceEngine for FakeEngine {
        async fn load(
            &self,
            _descriptor: &LocalModelDescriptor,
            dir: &Path,
        ) -> Result<Arc<dyn LoadedModel>, ProviderError> {
            assert!(dir.join("weights.bin").exists());
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                return Err(ProviderError::ModelUnavailable("corrupt weights".into()));
            }
            Ok(Arc::new(FakeModel {
                running: self.running.clone(),
                max_seen: self.max_seen.clone(),
            }))
        }
    }

    fn manager(
        dir: &Path,
        source: Arc<FakeSource>,
        engine: Arc<FakeEngine>,
    ) -> LocalModelManager {
        LocalModelManager::new(
            dir,
            vec![descriptor("org/a"), descriptor("org/b")],
            "org/a",
            source,
            engine,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn status_check_reflects_disk_and_removes_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), Arc::default(), Arc::default());
        assert_eq!(m.state().state, LifecycleState::Idle);

        assert_eq!(m.check_status().await.state, LifecycleState::NeedsDownload);

        std::fs::create_dir_all(m.storage_dir()).unwrap();
        assert_eq!(m.check_status().await.state, LifecycleState::NeedsDownload);
        assert!(!m.storage_dir().exists());

        std::fs::create_dir_all(m.storage_dir()).unwrap();
        std::fs::write(m.storage_dir().join("weights.bin"), b"abcd").unwrap();
        assert_eq!(m.check_status().await.state, LifecycleState::Downloaded);
    }

    #[tokio::test]
    async fn download_loads_and_reports_monotonic_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let m = manager(tmp.path(), Arc::default(), engine.clone());
        m.check_status().await;

        let mut rx = m.subscribe();
        let seen = Arc::new(Mutex::new(vec![]));
        let watcher = {
            let seen = seen.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let s = rx.borrow_and_update().clone();
                    let done = s.state == LifecycleState::Loaded;
                    seen.lock().unwrap().push(s);
                    if done {
                        break;
                    }
                }
            })
        };

        m.start_download().await.unwrap();
        watcher.await.unwrap();

        let status = m.state();
        assert_eq!(status.state, LifecycleState::Loaded);
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.info.unwrap().parameter_count, Some(3_000_000_000));
        assert!(m.storage_dir().join("weights.bin").exists());
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);

        let progress: Vec<f64> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.progress)
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        // No staging leftovers.
        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["org_a".to_string()]);
    }

    #[tokio::test]
    async fn cancel_returns_to_needs_download_and_restart_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let m = manager(tmp.path(), source, Arc::default());
        m.check_status().await;

        let first = {
            let m = m.clone();
            tokio::spawn(async move { m.start_download().await })
        };
        while m.state().state != LifecycleState::Downloading {
            tokio::task::yield_now().await;
        }
        m.cancel_download();
        let status = m.state();
        assert_eq!(status.state, LifecycleState::NeedsDownload);
        assert_eq!(status.error, None);
        assert!(first.await.unwrap().unwrap_err().is_cancelled());
        assert!(!m.storage_dir().exists());

        let second = {
            let m = m.clone();
            tokio::spawn(async move { m.start_download().await })
        };
        while !second.is_finished() {
            gate.notify_waiters();
            tokio::task::yield_now().await;
        }
        second.await.unwrap().unwrap();
        assert_eq!(m.state().state, LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn failures_set_error_and_retries_are_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            failures_left: AtomicUsize::new(10),
            ..Default::default()
        });
        let m = manager(tmp.path(), source.clone(), Arc::default());
        m.check_status().await;

        assert!(m.start_download().await.is_err());
        let status = m.state();
        assert_eq!(status.state, LifecycleState::Error);
        assert!(status.error.unwrap().contains("connection reset"));

        for attempt in 1..=MAX_RETRIES {
            assert!(m.retry().await.is_err());
            assert_eq!(m.state().retry_count, attempt);
        }
        let err = m.retry().await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelUnavailable(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1 + MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn retry_success_clears_counter() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let m = manager(tmp.path(), source, Arc::default());
        m.check_status().await;

        assert!(m.start_download().await.is_err());
        m.retry().await.unwrap();
        let status = m.state();
        assert_eq!(status.state, LifecycleState::Loaded);
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn load_from_disk_skips_network() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let m = manager(tmp.path(), source.clone(), Arc::default());
        std::fs::create_dir_all(m.storage_dir()).unwrap();
        std::fs::write(m.storage_dir().join("weights.bin"), b"abcd").unwrap();

        m.ensure_loaded().await.unwrap();
        assert_eq!(m.state().state, LifecycleState::Loaded);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    fn put_weights(m: &LocalModelManager) {
        std::fs::create_dir_all(m.storage_dir()).unwrap();
        std::fs::write(m.storage_dir().join("weights.bin"), b"abcd").unwrap();
    }

    async fn ask(m: &LocalModelManager) -> Result<String, ProviderError> {
        m.generate(None, &[ChatMessage::user("q")], &[], &CancelToken::never())
            .await
    }

    #[tokio::test]
    async fn load_failure_keeps_weights_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine {
            broken: true,
            ..Default::default()
        });
        let m = manager(tmp.path(), Arc::default(), engine);
        put_weights(&m);
        m.check_status().await;

        let err = m.load().await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelUnavailable(_)));
        assert_eq!(m.state().state, LifecycleState::Error);
        assert!(m.storage_dir().join("weights.bin").exists());
    }

    #[tokio::test]
    async fn generate_after_load_failure_reloads_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let engine = Arc::new(FakeEngine {
            broken: true,
            ..Default::default()
        });
        let m = manager(tmp.path(), source.clone(), engine.clone());
        put_weights(&m);

        for _ in 0..3 {
            assert!(matches!(
                ask(&m).await,
                Err(ProviderError::ModelUnavailable(_))
            ));
            assert_eq!(m.state().state, LifecycleState::Error);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.loads.load(Ordering::SeqCst), 3);
        assert_eq!(std::fs::read(m.storage_dir().join("weights.bin")).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn generate_after_download_failure_respects_retry_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            failures_left: AtomicUsize::new(100),
            ..Default::default()
        });
        let m = manager(tmp.path(), source.clone(), Arc::default());

        for _ in 0..=MAX_RETRIES {
            assert!(matches!(ask(&m).await, Err(ProviderError::Transport(_))));
        }
        assert_eq!(m.state().retry_count, MAX_RETRIES);

        assert!(matches!(
            ask(&m).await,
            Err(ProviderError::ModelUnavailable(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1 + MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn unsupported_engine_fails_before_any_download() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let m = LocalModelManager::new(
            tmp.path(),
            vec![descriptor("org/a")],
            "org/a",
            source.clone(),
            Arc::new(UnsupportedEngine),
        )
        .unwrap();
        m.check_status().await;

        assert!(matches!(ask(&m).await, Err(ProviderError::PlatformUnsupported)));
        assert!(matches!(
            m.start_download().await,
            Err(ProviderError::PlatformUnsupported)
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(!m.storage_dir().exists());
        assert_eq!(m.state().state, LifecycleState::NeedsDownload);

        put_weights(&m);
        m.check_status().await;
        assert!(matches!(m.load().await, Err(ProviderError::PlatformUnsupported)));
        assert_eq!(m.state().state, LifecycleState::Downloaded);
    }

    #[tokio::test]
    async fn generate_drives_lifecycle_and_serializes() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let m = manager(tmp.path(), Arc::default(), engine.clone());

        let mut tasks = vec![];
        for i in 0..4 {
            let m = m.clone();
            tasks.push(tokio::spawn(async move {
                m.generate(
                    None,
                    &[ChatMessage::user(format!("q{i}"))],
                    &[],
                    &CancelToken::never(),
                )
                .await
            }));
        }
        for (i, t) in tasks.into_iter().enumerate() {
            assert_eq!(t.await.unwrap().unwrap(), format!("echo: q{i}"));
        }
        assert_eq!(engine.max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_refused_while_busy_then_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let m = manager(tmp.path(), source, Arc::default());
        m.check_status().await;

        let download = {
            let m = m.clone();
            tokio::spawn(async move { m.start_download().await })
        };
        while m.state().state != LifecycleState::Downloading {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            m.delete().await,
            Err(ProviderError::ResourceBusy(_))
        ));

        while !download.is_finished() {
            gate.notify_waiters();
            tokio::task::yield_now().await;
        }
        download.await.unwrap().unwrap();

        {
            let _held = m.inner.inference.lock().await;
            assert!(matches!(
                m.delete().await,
                Err(ProviderError::ResourceBusy(_))
            ));
        }

        m.delete().await.unwrap();
        assert!(!m.storage_dir().exists());
        assert_eq!(m.state().state, LifecycleState::NeedsDownload);
    }

    #[tokio::test]
    async fn selecting_another_model_cancels_and_resets() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            gate: Some(gate),
            ..Default::default()
        });
        let m = manager(tmp.path(), source, Arc::default());
        m.check_status().await;

        let download = {
            let m = m.clone();
            tokio::spawn(async move { m.start_download().await })
        };
        while m.state().state != LifecycleState::Downloading {
            tokio::task::yield_now().await;
        }

        m.select("org/b").await.unwrap();
        assert!(download.await.unwrap().unwrap_err().is_cancelled());

        let status = m.state();
        assert_eq!(status.descriptor_id, "org/b");
        assert_eq!(status.state, LifecycleState::NeedsDownload);
        assert_eq!(status.progress, None);
        assert_eq!(status.retry_count, 0);
        assert!(m.storage_dir().ends_with("org_b"));
    }

    #[tokio::test]
    async fn unknown_selection_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), Arc::default(), Arc::default());
        assert!(m.select("nope").await.is_err());
        assert_eq!(m.descriptor().id, "org/a");
    }
}
