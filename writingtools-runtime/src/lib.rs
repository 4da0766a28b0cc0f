//! Stateful half of the app: persistence, sync, and the concrete backends.

pub mod backend;
pub mod cloud_sync;
pub mod command_store;
pub mod defaults;
pub mod downloader;
pub mod fs_util;
pub mod gemini_provider;
pub mod local_model;
pub mod local_provider;
pub mod migration;
pub mod models;
pub mod ollama_provider;
pub mod openai_provider;
pub mod remote_provider;
pub mod secrets;
pub mod settings_store;
