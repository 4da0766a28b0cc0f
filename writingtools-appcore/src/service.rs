use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use writingtools_core::command::Command;
use writingtools_core::config::{ProviderKind, Settings};
use writingtools_core::types::{CommandId, Selection};
use writingtools_engine::dispatch::{Collaborators, Dispatcher};
use writingtools_engine::error::DispatchError;
use writingtools_engine::session::{Conversation, DispatchOutcome};
use writingtools_engine::traits::{ProviderSource, TextExtractor, TextProvider};
use writingtools_platform::console::{
    ConsoleErrorChannel, ConsoleResponseSurface, NoopFocusRestorer, StdoutReplacer,
};
use writingtools_runtime::backend::Backend;
use writingtools_runtime::cloud_sync::{
    CloudSync, DEFAULT_PUSH_DEBOUNCE, PullOutcome, RemoteKeyValueStore,
};
use writingtools_runtime::command_store::CommandStore;
use writingtools_runtime::downloader::{HttpWeightsSource, WeightsSource};
use writingtools_runtime::fs_util::{AppPaths, ensure_dir};
use writingtools_runtime::local_model::{InferenceEngine, LocalModelManager, UnsupportedEngine};
use writingtools_runtime::migration::{LegacyState, MigrationReport, Migrator};
use writingtools_runtime::models::local_model_catalog;
use writingtools_runtime::secrets::{Credentials, SecretKey, delete_secret, set_secret};
use writingtools_runtime::settings_store::SettingsStore;

/// Collaborators for running in a terminal.
pub fn console_collaborators() -> Collaborators {
    Collaborators {
        response_surface: Arc::new(ConsoleResponseSurface),
        focus: Arc::new(NoopFocusRestorer),
        replacer: Arc::new(StdoutReplacer),
        errors: ConsoleErrorChannel.boxed(),
    }
}

pub struct ServiceOptions {
    /// Cloud sync is unavailable without a remote store.
    pub remote: Option<Arc<dyn RemoteKeyValueStore>>,
    /// Defaults to downloading over HTTP.
    pub weights: Option<Arc<dyn WeightsSource>>,
    pub engine: Arc<dyn InferenceEngine>,
    pub ocr: Option<Arc<dyn TextExtractor>>,
    /// `None` reads the OS keyring, and key changes are written back to it.
    pub credentials: Option<Credentials>,
    pub sync_debounce: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            remote: None,
            weights: None,
            engine: Arc::new(UnsupportedEngine),
            ocr: None,
            credentials: None,
            sync_debounce: DEFAULT_PUSH_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub migration: MigrationReport,
    pub pull: Option<PullOutcome>,
    pub sync_running: bool,
}

/// Holds the backend the dispatcher resolves on every run.
struct ActiveBackend {
    backend: Mutex<Arc<Backend>>,
}

impl ActiveBackend {
    fn get(&self) -> Arc<Backend> {
        self.backend
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace(&self, backend: Backend) {
        *self.backend.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(backend);
    }
}

impl ProviderSource for ActiveBackend {
    fn active_provider(&self) -> Arc<dyn TextProvider> {
        self.get()
    }
}

struct Inner {
    paths: AppPaths,
    settings_store: SettingsStore,
    settings: Mutex<Settings>,
    credentials: Mutex<Credentials>,
    use_keyring: bool,
    store: Arc<CommandStore>,
    migrator: Migrator,
    sync: Option<Arc<CloudSync>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    local: LocalModelManager,
    ocr: Option<Arc<dyn TextExtractor>>,
    active: Arc<ActiveBackend>,
    collaborators: Collaborators,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.sync_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The long-lived owner of everything the app keeps between commands.
#[derive(Clone)]
pub struct AppService {
    inner: Arc<Inner>,
}

impl AppService {
    pub fn open(
        documents_root: impl Into<PathBuf>,
        collaborators: Collaborators,
        options: ServiceOptions,
    ) -> anyhow::Result<Self> {
        let paths = AppPaths::new(documents_root);
        ensure_dir(&paths.data_dir())?;

        let settings_store = SettingsStore::at_path(paths.settings());
        let mut settings = settings_store.load_or_default()?;

        let use_keyring = options.credentials.is_none();
        let credentials = options
            .credentials
            .unwrap_or_else(Credentials::from_keyring);
        refresh_key_flags(&mut settings, &credentials);

        let store = Arc::new(CommandStore::load(paths.commands()).context("open command store")?);
        let migrator = Migrator::new(paths.migration_flag());

        let sync = match options.remote {
            Some(remote) => Some(Arc::new(
                CloudSync::new(store.clone(), remote, paths.sync_state())?
                    .with_debounce(options.sync_debounce),
            )),
            None => None,
        };

        let weights = match options.weights {
            Some(w) => w,
            None => Arc::new(HttpWeightsSource::new()?),
        };
        let local = LocalModelManager::new(
            paths.models_dir(),
            local_model_catalog(),
            &settings.local.selected_model_id,
            weights,
            options.engine,
        )?;

        let backend = Backend::from_settings(&settings, &credentials, &local, options.ocr.clone());
        log::info!(
            "opened {} (backend: {})",
            paths.data_dir().display(),
            backend.kind().label()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                paths,
                settings_store,
                settings: Mutex::new(settings),
                credentials: Mutex::new(credentials),
                use_keyring,
                store,
                migrator,
                sync,
                sync_task: Mutex::new(None),
                local,
                ocr: options.ocr,
                active: Arc::new(ActiveBackend {
                    backend: Mutex::new(Arc::new(backend)),
                }),
                collaborators,
            }),
        })
    }

    /// Migrates legacy commands, then pulls and starts sync if enabled.
    pub async fn startup(&self) -> anyhow::Result<StartupReport> {
        let legacy = LegacyState::load(&self.inner.paths.legacy_commands())?;
        let migration = self
            .inner
            .migrator
            .migrate_if_needed(&self.inner.store, &legacy)?;

        let pull = if self.settings().cloud_sync_enabled {
            self.start_sync().await
        } else {
            None
        };

        let status = self.inner.local.check_status().await;
        log::debug!("local model {}: {:?}", status.descriptor_id, status.state);

        Ok(StartupReport {
            migration,
            pull,
            sync_running: self.sync_running(),
        })
    }

    async fn start_sync(&self) -> Option<PullOutcome> {
        let Some(sync) = &self.inner.sync else {
            log::info!("cloud sync enabled but no remote store is configured");
            return None;
        };
        let pulled = match sync.pull().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::warn!("initial cloud pull failed: {e:#}");
                None
            }
        };
        let mut task = lock(&self.inner.sync_task);
        if task.as_ref().is_none_or(|t| t.is_finished()) {
            *task = Some(tokio::spawn(sync.clone().run()));
        }
        pulled
    }

    fn stop_sync(&self) {
        if let Some(task) = lock(&self.inner.sync_task).take() {
            task.abort();
            log::info!("cloud sync stopped");
        }
    }

    pub fn sync_running(&self) -> bool {
        lock(&self.inner.sync_task)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.store.commands()
    }

    /// Mutations go through the store so sync sees them.
    pub fn command_store(&self) -> &Arc<CommandStore> {
        &self.inner.store
    }

    /// By id, or by case-insensitive name.
    pub fn find_command(&self, query: &str) -> Option<Command> {
        let query = query.trim();
        if let Some(id) = CommandId::parse(query) {
            if let Some(cmd) = self.inner.store.get(id) {
                return Some(cmd);
            }
        }
        self.commands()
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(query))
    }

    pub fn settings(&self) -> Settings {
        lock(&self.inner.settings).clone()
    }

    pub fn active_provider_kind(&self) -> ProviderKind {
        self.inner.active.get().kind()
    }

    /// Persists `settings` and applies them: backend, model selection, sync.
    pub async fn save_settings(&self, mut settings: Settings) -> anyhow::Result<()> {
        refresh_key_flags(&mut settings, &lock(&self.inner.credentials));
        self.inner.settings_store.save(&settings)?;
        let previous = std::mem::replace(&mut *lock(&self.inner.settings), settings.clone());

        if previous.local.selected_model_id != settings.local.selected_model_id {
            if let Err(e) = self
                .inner
                .local
                .select(&settings.local.selected_model_id)
                .await
            {
                log::warn!("could not select local model: {e}");
            }
        }

        match (previous.cloud_sync_enabled, settings.cloud_sync_enabled) {
            (false, true) => {
                self.start_sync().await;
            }
            (true, false) => self.stop_sync(),
            _ => {}
        }

        self.rebuild_backend();
        Ok(())
    }

    /// Stores or, with an empty value, removes a credential.
    pub fn set_api_key(&self, key: SecretKey, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        if self.inner.use_keyring {
            if value.is_empty() {
                delete_secret(key)?;
            } else {
                set_secret(key, value)?;
            }
        }
        lock(&self.inner.credentials).set(key, value);

        let mut settings = self.settings();
        refresh_key_flags(&mut settings, &lock(&self.inner.credentials));
        self.inner.settings_store.save(&settings)?;
        *lock(&self.inner.settings) = settings;

        self.rebuild_backend();
        log::info!("updated {}", key.user());
        Ok(())
    }

    fn rebuild_backend(&self) {
        let settings = self.settings();
        let backend = Backend::from_settings(
            &settings,
            &lock(&self.inner.credentials),
            &self.inner.local,
            self.inner.ocr.clone(),
        );
        log::info!("active backend: {}", backend.kind().label());
        self.inner.active.replace(backend);
    }

    fn dispatcher(&self) -> Dispatcher {
        let settle = Duration::from_millis(self.settings().paste_settle_ms);
        Dispatcher::new(self.inner.active.clone(), self.inner.collaborators.clone())
            .with_settle_delay(settle)
    }

    pub async fn run_command(
        &self,
        command: &Command,
        selection: &Selection,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher().run(command, selection).await
    }

    pub async fn run_custom(
        &self,
        change: &str,
        selection: &Selection,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher().run_custom(change, selection).await
    }

    pub async fn follow_up(
        &self,
        conversation: &mut Conversation,
        question: &str,
    ) -> Result<String, DispatchError> {
        self.dispatcher().follow_up(conversation, question).await
    }

    /// Cancels whatever the active backend is doing.
    pub fn cancel(&self) {
        self.inner.active.get().cancel();
    }

    pub fn local_models(&self) -> &LocalModelManager {
        &self.inner.local
    }

    pub fn paths(&self) -> &AppPaths {
        &self.inner.paths
    }
}

fn refresh_key_flags(settings: &mut Settings, credentials: &Credentials) {
    settings.gemini_api_key_present = !credentials.get(SecretKey::GeminiApiKey).trim().is_empty();
    settings.openai_api_key_present = !credentials
        .get(SecretKey::OpenAiCompatibleApiKey)
        .trim()
        .is_empty();
}
