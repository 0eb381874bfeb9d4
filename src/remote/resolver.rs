// 路径解析
//
// 从根目录 (ID 0) 开始逐段查找；中间段只匹配目录，最后一段按调用方要求的类型匹配。
// 不做缓存，每次解析都重新请求

use crate::error::PanResult;
use crate::remote::lister::{ListOptions, PagedLister};
use crate::remote::{join_remote, normalize_remote_path, split_segments, EntryKind, RemoteEntry, ROOT_ID};
use tracing::debug;

/// 路径解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum PathResolution {
    Found { id: i64, entry: RemoteEntry },
    NotFound,
}

impl PathResolution {
    pub fn id(&self) -> Option<i64> {
        match self {
            PathResolution::Found { id, .. } => Some(*id),
            PathResolution::NotFound => None,
        }
    }

    pub fn entry(&self) -> Option<&RemoteEntry> {
        match self {
            PathResolution::Found { entry, .. } => Some(entry),
            PathResolution::NotFound => None,
        }
    }

    pub fn into_entry(self) -> Option<RemoteEntry> {
        match self {
            PathResolution::Found { entry, .. } => Some(entry),
            PathResolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, PathResolution::Found { .. })
    }
}

#[derive(Clone)]
pub struct PathResolver {
    lister: PagedLister,
    options: ListOptions,
}

impl PathResolver {
    pub fn new(lister: PagedLister, options: ListOptions) -> Self {
        Self { lister, options }
    }

    /// 解析绝对路径
    ///
    /// 相对路径返回参数错误，不会发出请求
    pub async fn resolve(&self, path: &str, expect_directory: bool) -> PanResult<PathResolution> {
        let path = normalize_remote_path(path)?;
        let segments = split_segments(&path);

        if segments.is_empty() {
            return Ok(if expect_directory {
                PathResolution::Found {
                    id: ROOT_ID,
                    entry: RemoteEntry::root(),
                }
            } else {
                PathResolution::NotFound
            });
        }

        let mut parent_id = ROOT_ID;
        let mut parent_path = String::from("/");
        let last = segments.len() - 1;

        for (index, segment) in segments.iter().enumerate() {
            let kind = if index < last || expect_directory {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            let Some(mut entry) = self
                .lister
                .find_child(parent_id, segment, kind, &self.options)
                .await?
            else {
                debug!(
                    "路径解析未找到: {} (在 {} 中缺少 {:?} {})",
                    path, parent_path, kind, segment
                );
                return Ok(PathResolution::NotFound);
            };

            entry.annotate(&parent_path, "/");
            parent_id = entry.id;
            parent_path = join_remote(&parent_path, segment);

            if index == last {
                return Ok(PathResolution::Found {
                    id: entry.id,
                    entry,
                });
            }
        }

        Ok(PathResolution::NotFound)
    }
}
