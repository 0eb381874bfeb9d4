// 单文件下载引擎
//
// 流程：获取下载地址 -> 流式写入同目录下的临时文件 -> 校验大小与 MD5 -> 重命名为目标文件
// 每次重试都重新获取下载地址（签名地址会过期）；中断时清理临时文件

use crate::config::DownloadConfig;
use crate::error::{PanError, PanResult};
use crate::netdisk::Pan123Client;
use crate::remote::retry::{check_cancelled, sleep_or_cancel};
use crate::remote::RemoteEntry;
use crate::uploader::rapid_upload::file_md5;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 下载参数
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// 本地已存在时是否覆盖
    pub overwrite: bool,
    /// 单个文件最大尝试次数
    pub max_tries: u32,
    /// 两次尝试之间的等待
    pub retry_wait: Duration,
}

impl DownloadOptions {
    /// 单文件下载：重试预算更宽松
    pub fn single_file(config: &DownloadConfig) -> Self {
        Self {
            overwrite: config.overwrite,
            max_tries: config.single_max_tries.max(1),
            retry_wait: Duration::from_millis(config.single_retry_wait_ms),
        }
    }

    /// 文件夹批量下载
    pub fn bulk(config: &DownloadConfig) -> Self {
        Self {
            overwrite: config.overwrite,
            max_tries: config.bulk_max_tries.max(1),
            retry_wait: Duration::from_millis(config.bulk_retry_wait_ms),
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// 单个文件的下载结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DownloadStatus {
    Downloaded { path: PathBuf, bytes: u64 },
    /// 本地已存在且未要求覆盖
    Skipped { path: PathBuf },
}

impl DownloadStatus {
    pub fn path(&self) -> &Path {
        match self {
            DownloadStatus::Downloaded { path, .. } | DownloadStatus::Skipped { path } => path,
        }
    }
}

#[derive(Clone)]
pub struct DownloadEngine {
    client: Pan123Client,
    cancel: CancellationToken,
}

impl DownloadEngine {
    pub fn new(client: Pan123Client, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 下载一个远程文件到 `dest`
    pub async fn download_entry(
        &self,
        entry: &RemoteEntry,
        dest: &Path,
        options: &DownloadOptions,
    ) -> PanResult<DownloadStatus> {
        if !entry.is_file() {
            return Err(PanError::Validation(format!("不是文件: {}", entry.full_path)));
        }
        if dest.is_dir() {
            return Err(PanError::Validation(format!(
                "目标路径是文件夹: {}",
                dest.display()
            )));
        }
        if dest.exists() && !options.overwrite {
            info!("文件已存在，跳过下载: {}", dest.display());
            return Ok(DownloadStatus::Skipped {
                path: dest.to_path_buf(),
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut last_error = None;
        for attempt in 1..=options.max_tries {
            check_cancelled(&self.cancel)?;

            let temp = temp_path_for(dest);
            let result = self.try_download(entry, &temp, dest).await;
            match result {
                Ok(bytes) => {
                    info!(
                        "下载完成: {} -> {} ({} bytes)",
                        entry.full_path,
                        dest.display(),
                        bytes
                    );
                    return Ok(DownloadStatus::Downloaded {
                        path: dest.to_path_buf(),
                        bytes,
                    });
                }
                Err(e) => {
                    remove_quietly(&temp).await;
                    if e.is_interrupt() {
                        return Err(e);
                    }
                    warn!(
                        "下载失败 (第 {}/{} 次): {}: {}",
                        attempt, options.max_tries, entry.full_path, e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < options.max_tries {
                sleep_or_cancel(&self.cancel, options.retry_wait).await?;
            }
        }

        Err(match last_error {
            Some(e @ PanError::ChecksumMismatch { .. }) => e,
            Some(e) => PanError::TransferFailed(format!(
                "{} 下载失败 (已尝试 {} 次): {}",
                entry.full_path, options.max_tries, e
            )),
            None => PanError::TransferFailed(format!("{} 下载失败", entry.full_path)),
        })
    }

    async fn try_download(&self, entry: &RemoteEntry, temp: &Path, dest: &Path) -> PanResult<u64> {
        let url = self.client.download_info(entry.id).await?;
        debug!("下载地址: fileID={} -> {}", entry.id, url);

        check_cancelled(&self.cancel)?;
        let bytes = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PanError::Interrupted),
            result = self.client.transport().download_to(&url, temp) => result?,
        };

        if bytes != entry.size {
            return Err(PanError::TransferFailed(format!(
                "文件大小不匹配: 实际 {} bytes, 期望 {} bytes",
                bytes, entry.size
            )));
        }
        verify_md5(temp, &entry.etag).await?;

        tokio::fs::rename(temp, dest).await?;
        Ok(bytes)
    }
}

/// etag 为空时不校验
async fn verify_md5(path: &Path, etag: &str) -> PanResult<()> {
    if etag.is_empty() {
        return Ok(());
    }
    let actual = file_md5(path).await?;
    if !actual.eq_ignore_ascii_case(etag) {
        return Err(PanError::ChecksumMismatch {
            expected: etag.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}

/// 与目标文件同目录的临时文件，保证 rename 不跨文件系统
fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let temp_name = format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple());
    match dest.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("清理临时文件失败: {}: {}", path.display(), e);
        }
    }
}
