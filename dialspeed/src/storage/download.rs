use std::path::Path;
use std::time::Duration;

use common::Result;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::RemoteStore;

/// Retry/backoff knobs for one file transfer.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    pub max_attempts: u32,
    /// Small chunks tolerate flaky connections better than one long read.
    pub chunk_size: u64,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            chunk_size: 256 * 1024,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl DownloadPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        (self.base_delay * factor).min(self.max_delay)
    }
}

/// Downloads one remote object into `dest`.
///
/// The transfer lands in a sibling `.part` file and is renamed into place
/// only on success, so a crash mid-transfer never leaves a corrupted final
/// file. Chunked reads are retried up to the attempt budget with exponential
/// backoff; after the last chunked attempt fails, a single whole-object read
/// is tried before giving up. On total failure the temp file is removed and
/// the original chunked error is surfaced.
pub async fn download_to_path(
    store: &dyn RemoteStore,
    file_id: &str,
    dest: &Path,
    policy: &DownloadPolicy,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_sibling(dest);
    // Clean any previous partial
    let _ = tokio::fs::remove_file(&tmp_path).await;

    for attempt in 1..=policy.max_attempts {
        match chunked_transfer(store, file_id, &tmp_path, policy.chunk_size).await {
            Ok(()) => {
                tokio::fs::rename(&tmp_path, dest).await?;
                return Ok(());
            }
            Err(e) if attempt == policy.max_attempts => {
                warn!(file_id, error = %e, "Chunked download exhausted, trying whole-object fallback");
                match whole_transfer(store, file_id, &tmp_path).await {
                    Ok(()) => {
                        tokio::fs::rename(&tmp_path, dest).await?;
                        return Ok(());
                    }
                    Err(_) => {
                        let _ = tokio::fs::remove_file(&tmp_path).await;
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                warn!(file_id, attempt, error = %e, "Chunked download failed, backing off");
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }
    }

    // max_attempts is >= 1, the loop always returns
    Err(common::Error::MaxRetriesExceeded)
}

fn temp_sibling(dest: &Path) -> std::path::PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    dest.with_file_name(name)
}

async fn chunked_transfer(
    store: &dyn RemoteStore,
    file_id: &str,
    tmp_path: &Path,
    chunk_size: u64,
) -> Result<()> {
    let total = store.object_size(file_id).await?;
    let mut file = tokio::fs::File::create(tmp_path).await?;

    let mut offset = 0u64;
    while offset < total {
        let len = chunk_size.min(total - offset);
        let chunk = store.read_range(file_id, offset, len).await?;
        if chunk.is_empty() {
            return Err(common::Error::Storage(format!(
                "Short read at offset {} of {}",
                offset, file_id
            )));
        }
        file.write_all(&chunk).await?;
        offset += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(())
}

async fn whole_transfer(store: &dyn RemoteStore, file_id: &str, tmp_path: &Path) -> Result<()> {
    let data = store.read_whole(file_id).await?;
    tokio::fs::write(tmp_path, &data).await?;
    Ok(())
}
