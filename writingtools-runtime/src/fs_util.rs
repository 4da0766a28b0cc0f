use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Digest;
use writingtools_core::model::STORAGE_NAMESPACE;

/// Where every persisted file lives under a caller-supplied documents root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    documents_root: PathBuf,
}

impl AppPaths {
    pub fn new(documents_root: impl Into<PathBuf>) -> Self {
        Self {
            documents_root: documents_root.into(),
        }
    }

    pub fn documents_root(&self) -> &Path {
        &self.documents_root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.documents_root.join(STORAGE_NAMESPACE)
    }

    pub fn settings(&self) -> PathBuf {
        self.data_dir().join("settings.json")
    }

    pub fn commands(&self) -> PathBuf {
        self.data_dir().join("commands.json")
    }

    pub fn migration_flag(&self) -> PathBuf {
        self.data_dir().join("migration.json")
    }

    pub fn legacy_commands(&self) -> PathBuf {
        self.data_dir().join("legacy_commands.json")
    }

    pub fn sync_state(&self) -> PathBuf {
        self.data_dir().join("sync_state.json")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir().join("models")
    }
}

pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create dir: {}", path.display()))
}

/// Missing or empty directories both count as empty.
pub fn dir_is_empty(path: &Path) -> anyhow::Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(anyhow::Error::new(e).context(format!("failed to list: {}", path.display()))),
    }
}

pub fn remove_dir_if_exists(path: &Path) -> anyhow::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("failed to remove: {}", path.display()))),
    }
}

pub fn replace_file(tmp: &Path, dst: &Path) -> anyhow::Result<()> {
    let backup = dst.with_extension("bak");

    if dst.exists() {
        let _ = fs::remove_file(&backup);
        fs::rename(dst, &backup)
            .with_context(|| format!("failed rename {} -> {}", dst.display(), backup.display()))?;
    }

    if let Err(e) = fs::rename(tmp, dst) {
        // Try to restore previous file if we had one.
        if backup.exists() {
            let _ = fs::rename(&backup, dst);
        }
        let _ = fs::remove_file(tmp);
        return Err(anyhow::Error::new(e).context(format!(
            "failed rename {} -> {}",
            tmp.display(),
            dst.display()
        )));
    }

    let _ = fs::remove_file(&backup);
    Ok(())
}

/// Write temp then replace, so readers never see a half-written file.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("write temp: {}", tmp.display()))?;
    replace_file(&tmp, path).with_context(|| format!("replace file: {}", path.display()))
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("encode JSON: {}", path.display()))?;
    write_bytes_atomic(path, &json)
}

/// `Ok(None)` when the file does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("read: {}", path.display())));
        }
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("decode JSON: {}", path.display()))?;
    Ok(Some(value))
}

pub fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f =
        fs::File::open(path).with_context(|| format!("failed to open: {}", path.display()))?;
    let mut hasher = sha2::Sha256::new();

    let mut buf = [0u8; 8192];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("failed reading: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
