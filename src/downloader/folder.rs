//! 文件夹下载
//!
//! 并发遍历远程目录树，在本地 `local_dir/目录名/` 下重建结构，
//! 再以有界并发逐个下载文件。被放弃的遍历分支也计入失败项。

use crate::common::{run_bounded, BatchReport};
use crate::downloader::engine::{DownloadEngine, DownloadOptions, DownloadStatus};
use crate::error::PanResult;
use crate::remote::walker::TreeWalker;
use crate::remote::{base_name, relative_to, split_segments, RemoteEntry};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 远程相对路径映射到本地；跳过 `.`、`..` 等不安全的段
pub fn local_path_for(base: &Path, relative_path: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for segment in split_segments(relative_path) {
        if segment == "." || segment == ".." {
            continue;
        }
        path.push(segment);
    }
    path
}

impl DownloadEngine {
    /// 下载整个远程文件夹
    ///
    /// `root_id`/`root_path` 为已解析的远程目录；返回按文件统计的结果
    pub async fn download_directory(
        &self,
        walker: &TreeWalker,
        root_id: i64,
        root_path: &str,
        local_dir: &Path,
        options: &DownloadOptions,
        workers: usize,
    ) -> PanResult<BatchReport<DownloadStatus>> {
        let outcome = walker.walk_concurrent(root_id, root_path).await?;
        let folder_name = match base_name(root_path) {
            "" => "root",
            name => name,
        };
        let base = local_dir.join(folder_name);
        tokio::fs::create_dir_all(&base).await?;

        let mut report = BatchReport::new();

        // 本地目录建不起来时只放弃该子树
        let mut blocked: Vec<String> = Vec::new();
        for dir in outcome.directories() {
            if blocked
                .iter()
                .any(|b| relative_to(&dir.relative_path, b).is_some())
            {
                continue;
            }
            let local = local_path_for(&base, &dir.relative_path);
            if let Err(e) = tokio::fs::create_dir_all(&local).await {
                warn!("创建本地目录失败，跳过该目录: {}: {}", local.display(), e);
                report.record_failure(
                    dir.full_path.clone(),
                    format!("创建本地目录失败: {}: {}", local.display(), e),
                );
                blocked.push(dir.relative_path.clone());
            }
        }

        let (skipped, files): (Vec<RemoteEntry>, Vec<RemoteEntry>) =
            outcome.files().cloned().partition(|f| {
                blocked
                    .iter()
                    .any(|b| relative_to(&f.relative_path, b).is_some())
            });
        for file in skipped {
            report.record_failure(file.full_path, "本地目录不可用，未下载");
        }
        info!(
            "开始下载文件夹: {} -> {} ({} 个文件, 并发 {})",
            root_path,
            base.display(),
            files.len(),
            workers
        );

        let names: Vec<String> = files.iter().map(|f| f.full_path.clone()).collect();
        let results = run_bounded(files, workers, self.cancel_token(), |entry| {
            let engine = self.clone();
            let options = options.clone();
            let dest = local_path_for(&base, &entry.relative_path);
            async move { engine.download_entry(&entry, &dest, &options).await }
        })
        .await?;

        for (name, result) in names.into_iter().zip(results) {
            report.record(name, result)?;
        }
        for failure in &outcome.failures {
            warn!("目录未能完整遍历: {} ({})", failure.path, failure.reason);
            report.record_failure(failure.path.clone(), failure.reason.clone());
        }

        info!(
            "文件夹下载结束: {} 成功, {} 失败, 共 {}",
            report.succeeded, report.failed, report.total
        );
        Ok(report)
    }
}
