//! 文件夹扫描和批量上传
//!
//! 负责:
//! - 递归扫描本地文件夹（walkdir）
//! - 以 `根目录名/相对路径` 作为远程文件名，由服务端按 containDir 建立目录结构
//! - 有界并发上传，按文件汇总结果

use crate::common::{format_bytes, run_bounded, BatchReport};
use crate::error::{PanError, PanResult};
use crate::uploader::engine::{UploadEngine, UploadOutcome, UploadTarget};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 文件扫描结果
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 相对于扫描根目录的路径
    pub relative_path: PathBuf,
    pub size: u64,
}

impl ScannedFile {
    /// 相对路径转为远程使用的 `/` 分隔形式
    pub fn remote_relative(&self) -> String {
        to_remote_relative(&self.relative_path)
    }
}

/// 文件夹扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 超过此大小的文件将被跳过
    pub max_file_size: Option<u64>,
    /// 最大文件数量，超过后停止扫描
    pub max_files: Option<usize>,
    /// 跳过以 `.` 开头的文件和文件夹
    pub skip_hidden: bool,
}

/// 扫描结果：成功读取的文件与无法读取的条目
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    /// (路径, 原因)
    pub unreadable: Vec<(String, String)>,
}

/// 文件夹扫描器
#[derive(Debug, Clone, Default)]
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 递归扫描文件夹，结果按相对路径排序
    pub fn scan(&self, root_path: &Path) -> PanResult<ScanResult> {
        if !root_path.is_dir() {
            return Err(PanError::Validation(format!(
                "扫描路径不是文件夹: {}",
                root_path.display()
            )));
        }
        info!("开始扫描文件夹: {}", root_path.display());

        let skip_hidden = self.options.skip_hidden;
        let walker = WalkDir::new(root_path)
            .follow_links(self.options.follow_symlinks)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !skip_hidden || !is_hidden(e));

        let mut result = ScanResult::default();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root_path.display().to_string());
                    warn!("读取目录条目失败: {}: {}", path, e);
                    result.unreadable.push((path, e.to_string()));
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                if !entry.file_type().is_dir() {
                    debug!("跳过非常规文件: {}", entry.path().display());
                }
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    result
                        .unreadable
                        .push((entry.path().display().to_string(), e.to_string()));
                    continue;
                }
            };

            if let Some(max_size) = self.options.max_file_size {
                if size > max_size {
                    warn!("跳过超大文件: {} ({})", entry.path().display(), format_bytes(size));
                    continue;
                }
            }

            let relative_path = match entry.path().strip_prefix(root_path) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => PathBuf::from(entry.file_name()),
            };
            result.files.push(ScannedFile {
                local_path: entry.path().to_path_buf(),
                relative_path,
                size,
            });

            if let Some(max_files) = self.options.max_files {
                if result.files.len() >= max_files {
                    warn!("已达到最大文件数量限制 ({}), 停止扫描", max_files);
                    break;
                }
            }
        }

        result.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        info!(
            "文件夹扫描完成: {} 个文件，总大小 {}，{} 个条目无法读取",
            result.files.len(),
            format_bytes(result.files.iter().map(|f| f.size).sum()),
            result.unreadable.len()
        );
        Ok(result)
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn to_remote_relative(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl UploadEngine {
    /// 上传整个文件夹到 `remote_parent_id` 下
    ///
    /// 远程结构为 `文件夹名/相对路径`；每个文件独立成败，用户中断直接返回 Err
    pub async fn upload_directory(
        &self,
        local_dir: &Path,
        remote_parent_id: i64,
        scan_options: ScanOptions,
        workers: usize,
    ) -> PanResult<BatchReport<UploadOutcome>> {
        let root_name = local_dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .or_else(|| local_dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .ok_or_else(|| {
                PanError::Validation(format!("无法确定文件夹名称: {}", local_dir.display()))
            })?;

        let scanner = FolderScanner::with_options(scan_options);
        let dir = local_dir.to_path_buf();
        let scan = tokio::task::spawn_blocking(move || scanner.scan(&dir))
            .await
            .map_err(|e| PanError::Io(std::io::Error::other(format!("扫描任务执行失败: {}", e))))??;

        info!(
            "开始上传文件夹: {} -> 父目录 {} ({} 个文件, 并发 {})",
            local_dir.display(),
            remote_parent_id,
            scan.files.len(),
            workers
        );

        let names: Vec<String> = scan
            .files
            .iter()
            .map(|f| f.local_path.display().to_string())
            .collect();

        let results = run_bounded(scan.files, workers, self.cancel_token(), |file| {
            let engine = self.clone();
            let target = UploadTarget::with_dirs(
                remote_parent_id,
                format!("{}/{}", root_name, file.remote_relative()),
            );
            async move { engine.upload_file(&file.local_path, &target).await }
        })
        .await?;

        let mut report = BatchReport::new();
        for (name, result) in names.into_iter().zip(results) {
            if let Err(e) = &result {
                warn!("文件上传失败: {}: {}", name, e);
            }
            report.record(name, result)?;
        }
        for (path, reason) in scan.unreadable {
            report.record_failure(path, reason);
        }

        info!(
            "文件夹上传结束: {} 成功, {} 失败, 共 {}",
            report.succeeded, report.failed, report.total
        );
        Ok(report)
    }
}
