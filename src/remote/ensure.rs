// 目录确保存在
//
// 逐段查找，缺失则创建并以新目录ID作为下一段的父目录。
// 非事务：并发创建同一路径可能产生重名目录

use crate::error::{PanError, PanResult};
use crate::remote::lister::{ListOptions, PagedLister};
use crate::remote::retry::check_cancelled;
use crate::remote::{split_segments, EntryKind, ROOT_ID};
use tracing::info;

#[derive(Clone)]
pub struct DirectoryEnsurer {
    lister: PagedLister,
    options: ListOptions,
}

impl DirectoryEnsurer {
    pub fn new(lister: PagedLister, options: ListOptions) -> Self {
        Self { lister, options }
    }

    /// 确保目录存在，返回目录ID
    ///
    /// 不以 `/` 开头的路径同样从根目录开始；`..` 段返回参数错误
    pub async fn ensure_directory(&self, path: &str) -> PanResult<i64> {
        let segments = split_segments(path);
        if segments.iter().any(|s| *s == "..") {
            return Err(PanError::Validation(format!(
                "远程路径不支持 ..: {:?}",
                path
            )));
        }

        let mut parent_id = ROOT_ID;
        for segment in segments {
            check_cancelled(self.lister.cancel_token())?;

            let existing = self
                .lister
                .find_child(parent_id, segment, EntryKind::Directory, &self.options)
                .await?;

            parent_id = match existing {
                Some(entry) => entry.id,
                None => {
                    let id = self.lister.client().mkdir(segment, parent_id).await?;
                    info!("创建目录: {} (父目录={}, ID={})", segment, parent_id, id);
                    id
                }
            };
        }
        Ok(parent_id)
    }
}
