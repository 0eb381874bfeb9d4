// 远程目录树模块
//
// 把 `/a/b/c.txt` 这样的路径映射到按 ID 寻址、分页返回的列表接口上

pub mod ensure;
pub mod lister;
pub mod resolver;
pub mod retry;
pub mod snapshot;
pub mod walker;

pub use ensure::DirectoryEnsurer;
pub use lister::{ListOptions, ListingApi, PagedLister};
pub use resolver::{PathResolution, PathResolver};
pub use retry::RetryPolicy;
pub use walker::{BranchFailure, TreeWalker, WalkOptions, WalkOutcome};

use crate::error::{PanError, PanResult};
use crate::netdisk::FileInfo;
use serde::Serialize;

/// 根目录ID
pub const ROOT_ID: i64 = 0;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// 远程条目
///
/// `full_path` / `relative_path` 在遍历时生成，只在本次会话内有效
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteEntry {
    pub id: i64,
    pub name: String,
    pub kind: EntryKind,
    pub trashed: bool,
    pub etag: String,
    pub size: u64,
    pub parent_id: i64,
    pub full_path: String,
    pub relative_path: String,
}

impl From<FileInfo> for RemoteEntry {
    fn from(info: FileInfo) -> Self {
        let kind = if info.is_directory() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Self {
            id: info.file_id,
            kind,
            trashed: info.trashed,
            etag: info.etag,
            size: if kind == EntryKind::File { info.size } else { 0 },
            parent_id: info.parent_file_id,
            full_path: String::new(),
            relative_path: String::new(),
            name: info.filename,
        }
    }
}

impl RemoteEntry {
    /// 根目录
    pub fn root() -> Self {
        Self {
            id: ROOT_ID,
            name: String::new(),
            kind: EntryKind::Directory,
            trashed: false,
            etag: String::new(),
            size: 0,
            parent_id: ROOT_ID,
            full_path: "/".to_string(),
            relative_path: String::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// 根据父路径与遍历根生成路径字段
    pub fn annotate(&mut self, parent_path: &str, root_path: &str) {
        self.full_path = join_remote(parent_path, &self.name);
        self.relative_path =
            relative_to(&self.full_path, root_path).unwrap_or_else(|| self.name.clone());
    }
}

/// 规范化绝对路径
///
/// 合并多余的 `/`，去掉末尾 `/` 与 `.` 段；相对路径与 `..` 段返回参数错误
pub fn normalize_remote_path(path: &str) -> PanResult<String> {
    if !path.starts_with('/') {
        return Err(PanError::Validation(format!(
            "远程路径必须以 / 开头: {:?}",
            path
        )));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(PanError::Validation(format!(
                    "远程路径不支持 ..: {:?}",
                    path
                )))
            }
            s => segments.push(s),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

/// 路径分段（不含根）
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

/// 拼接远程路径
pub fn join_remote(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{}/{}", parent, name)
}

/// `full` 相对 `root` 的路径，不在 `root` 之下时返回 None
pub fn relative_to(full: &str, root: &str) -> Option<String> {
    let root = root.trim_end_matches('/');
    let rest = full.strip_prefix(root)?;
    let rest = rest.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// 路径最后一段（根目录为空字符串）
pub fn base_name(path: &str) -> &str {
    split_segments(path).last().copied().unwrap_or("")
}
