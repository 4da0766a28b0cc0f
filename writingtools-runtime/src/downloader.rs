//! Fetches a descriptor's weight files into a directory.

use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use writingtools_core::model::{LocalModelDescriptor, ModelFile};
use writingtools_engine::cancel::CancelToken;
use writingtools_engine::error::ProviderError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    /// Known only when the manifest lists every file size.
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) | None => None,
            Some(total) => Some((self.downloaded_bytes as f64 / total as f64).min(1.0)),
        }
    }
}

pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

#[async_trait]
pub trait WeightsSource: Send + Sync {
    /// Writes every manifest file under `dest`. Must stop promptly once `token` is cancelled.
    async fn fetch(
        &self,
        descriptor: &LocalModelDescriptor,
        dest: &Path,
        token: &CancelToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), ProviderError>;
}

/// Streams files over HTTP into `<name>.part`, then renames.
#[derive(Debug, Clone)]
pub struct HttpWeightsSource {
    client: reqwest::Client,
}

impl HttpWeightsSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

fn io_error(what: &str, path: &Path, e: std::io::Error) -> ProviderError {
    ProviderError::ModelUnavailable(format!("{what} {}: {e}", path.display()))
}

fn target_path(dest: &Path, file: &ModelFile) -> Result<PathBuf, ProviderError> {
    let rel = Path::new(&file.name);
    let safe = !file.name.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(ProviderError::ModelUnavailable(format!(
            "invalid file name in manifest: {:?}",
            file.name
        )));
    }
    Ok(dest.join(rel))
}

impl HttpWeightsSource {
    async fn fetch_file(
        &self,
        file: &ModelFile,
        target: &Path,
        token: &CancelToken,
        done_before: u64,
        total: Option<u64>,
        progress: ProgressFn<'_>,
    ) -> Result<u64, ProviderError> {
        let resp = tokio::select! {
            _ = token.cancelled() => return Err(ProviderError::Cancelled),
            r = self.client.get(&file.url).send() => {
                r.map_err(|e| ProviderError::Transport(e.to_string()))?
            }
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::RemoteRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create", parent, e))?;
        }
        let part = target.with_extension("part");
        let mut out = tokio::fs::File::create(&part)
            .await
            .map_err(|e| io_error("create", &part, e))?;

        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => None,
                c = stream.next() => Some(c),
            };
            let Some(chunk) = chunk else {
                drop(out);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(ProviderError::Cancelled);
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| ProviderError::Transport(e.to_string()))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| io_error("write", &part, e))?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
            if !token.is_cancelled() {
                progress(DownloadProgress {
                    downloaded_bytes: done_before + written,
                    total_bytes: total,
                });
            }
        }
        out.flush().await.map_err(|e| io_error("flush", &part, e))?;
        drop(out);

        if let Some(expected) = &file.sha256 {
            let actual = format!("{:x}", hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(ProviderError::ModelUnavailable(format!(
                    "checksum mismatch for {}",
                    file.name
                )));
            }
        }

        tokio::fs::rename(&part, target)
            .await
            .map_err(|e| io_error("rename", &part, e))?;
        Ok(written)
    }
}

#[async_trait]
impl WeightsSource for HttpWeightsSource {
    async fn fetch(
        &self,
        descriptor: &LocalModelDescriptor,
        dest: &Path,
        token: &CancelToken,
        progress: ProgressFn<'_>,
    ) -> Result<(), ProviderError> {
        let total = descriptor.expected_bytes();
        let mut done = 0u64;
        for file in &descriptor.files {
            token.check()?;
            let target = target_path(dest, file)?;
            log::debug!("downloading {} for {}", file.name, descriptor.id);
            done += self
                .fetch_file(file, &target, token, done, total, progress)
                .await?;
        }
        log::info!("downloaded {} ({done} bytes)", descriptor.id);
        Ok(())
    }
}
