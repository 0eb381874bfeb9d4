// 目录列表快照
//
// 遍历子树后每个目录保存一个 JSON：`{时间戳}_{目录ID}_{路径}.json`
// 列表失败的目录不写快照，只出现在 failures 里

use crate::error::{PanError, PanResult};
use crate::persistence::{sanitize_component, save_json_atomic};
use crate::remote::walker::{BranchFailure, TreeWalker};
use crate::remote::RemoteEntry;
use chrono::Local;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 文件名中路径部分的最大字符数
const MAX_PATH_CHARS: usize = 80;

/// 单个目录的快照内容
#[derive(Debug, Serialize)]
struct DirectorySnapshot {
    dir_id: i64,
    path: String,
    taken_at: String,
    entries: Vec<RemoteEntry>,
}

/// 快照结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotReport {
    pub files: Vec<PathBuf>,
    pub entry_count: usize,
    pub failures: Vec<BranchFailure>,
}

/// 快照文件名
pub fn snapshot_file_name(dir_id: i64, dir_path: &str) -> String {
    format!(
        "{}_{}_{}.json",
        Local::now().format("%Y%m%d_%H%M%S_%3f"),
        dir_id,
        sanitize_component(dir_path, MAX_PATH_CHARS)
    )
}

fn parent_path(full_path: &str) -> &str {
    match full_path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// 遍历 `root_path` 并为每个目录写入一个快照文件
pub async fn snapshot_tree(
    walker: &TreeWalker,
    root_id: i64,
    root_path: &str,
    out_dir: &Path,
) -> PanResult<SnapshotReport> {
    let outcome = walker.walk_concurrent(root_id, root_path).await?;
    let root_path = crate::remote::normalize_remote_path(root_path)?;

    let mut directories: BTreeMap<&str, i64> = BTreeMap::new();
    directories.insert(root_path.as_str(), root_id);
    for dir in outcome.directories() {
        directories.insert(dir.full_path.as_str(), dir.id);
    }

    let mut children: BTreeMap<&str, Vec<&RemoteEntry>> = BTreeMap::new();
    for entry in &outcome.entries {
        children
            .entry(parent_path(&entry.full_path))
            .or_default()
            .push(entry);
    }

    let mut report = SnapshotReport {
        entry_count: outcome.entries.len(),
        failures: outcome.failures.clone(),
        ..Default::default()
    };

    let failed: HashSet<i64> = outcome.failures.iter().map(|f| f.dir_id).collect();
    let mut pending: Vec<(PathBuf, DirectorySnapshot)> = Vec::new();
    for (path, dir_id) in directories {
        if failed.contains(&dir_id) {
            warn!("目录列表不完整，不保存快照: {} (ID={})", path, dir_id);
            continue;
        }
        let entries = children
            .remove(path)
            .unwrap_or_default()
            .into_iter()
            .cloned()
            .collect();
        let snapshot = DirectorySnapshot {
            dir_id,
            path: path.to_string(),
            taken_at: Local::now().to_rfc3339(),
            entries,
        };
        pending.push((out_dir.join(snapshot_file_name(dir_id, path)), snapshot));
    }

    report.files = tokio::task::spawn_blocking(move || {
        pending
            .iter()
            .map(|(file, snapshot)| save_json_atomic(file, snapshot))
            .collect::<PanResult<Vec<PathBuf>>>()
    })
    .await
    .map_err(|e| PanError::Io(std::io::Error::other(format!("写入快照任务执行失败: {}", e))))??;

    info!(
        "快照完成: {} 共 {} 个目录文件, {} 个条目",
        root_path,
        report.files.len(),
        report.entry_count
    );
    Ok(report)
}
