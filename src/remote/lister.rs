// 分页列表
//
// 把游标/页码翻页隐藏在"列出某目录全部子项"之后：
// - v2：lastFileId 游标，-1 表示最后一页
// - v1：page 从 1 开始，累计条数达到 total 或遇到空页即结束
// 每一页独立重试，成功一页后计数器归零

use crate::error::{PanError, PanResult};
use crate::netdisk::{Pan123Client, SearchQuery};
use crate::remote::retry::{check_cancelled, RetryPolicy};
use crate::remote::{EntryKind, RemoteEntry};
use std::collections::HashSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 使用的列表接口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingApi {
    /// `/api/v2/file/list`，游标翻页
    #[default]
    CursorV2,
    /// `/api/v1/file/list`，页码翻页（限速更严格）
    PagedV1,
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    /// 每页条数（1-100）
    pub page_limit: u32,
    /// 是否包含回收站中的条目
    pub include_trashed: bool,
    pub api: ListingApi,
    /// 仅 v2 支持
    pub search: Option<SearchQuery>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page_limit: 100,
            include_trashed: false,
            api: ListingApi::CursorV2,
            search: None,
        }
    }
}

impl ListOptions {
    pub fn with_page_limit(page_limit: u32) -> Self {
        Self {
            page_limit,
            ..Self::default()
        }
    }
}

/// 分页列表器
#[derive(Clone)]
pub struct PagedLister {
    client: Pan123Client,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
enum Position {
    Cursor(Option<i64>),
    Page { page: u32, received: u64 },
}

/// 单个目录的翻页位置
pub struct PageCursor<'a> {
    lister: &'a PagedLister,
    parent_id: i64,
    options: &'a ListOptions,
    position: Position,
    seen: HashSet<i64>,
    done: bool,
}

impl<'a> PageCursor<'a> {
    pub fn parent_id(&self) -> i64 {
        self.parent_id
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 获取下一页；所有页取完后返回 None
    pub async fn next_page(&mut self) -> PanResult<Option<Vec<RemoteEntry>>> {
        if self.done {
            return Ok(None);
        }

        let lister = self.lister;
        let parent_id = self.parent_id;
        let limit = self.options.page_limit;

        let items = match self.position {
            Position::Cursor(cursor) => {
                let search = self.options.search.as_ref();
                let data = lister
                    .with_retry(parent_id, || {
                        lister.client.list_v2(parent_id, limit, cursor, search)
                    })
                    .await?;

                if data.is_last_page() {
                    self.done = true;
                } else if cursor == Some(data.last_file_id) {
                    warn!(
                        "目录 {} 的分页游标未前进 (lastFileId={})，停止翻页",
                        parent_id, data.last_file_id
                    );
                    self.done = true;
                } else {
                    self.position = Position::Cursor(Some(data.last_file_id));
                }
                data.file_list
            }
            Position::Page { page, received } => {
                let data = lister
                    .with_retry(parent_id, || lister.client.list_v1(parent_id, page, limit))
                    .await?;

                let received = received + data.file_list.len() as u64;
                if data.file_list.is_empty() || received >= data.total {
                    self.done = true;
                }
                self.position = Position::Page {
                    page: page + 1,
                    received,
                };
                data.file_list
            }
        };

        let include_trashed = self.options.include_trashed;
        let entries: Vec<RemoteEntry> = items
            .into_iter()
            .filter(|info| self.seen.insert(info.file_id))
            .map(RemoteEntry::from)
            .filter(|entry| include_trashed || !entry.trashed)
            .collect();

        debug!(
            "目录 {} 获取一页: {} 条, 已完成={}",
            parent_id,
            entries.len(),
            self.done
        );
        Ok(Some(entries))
    }
}

impl PagedLister {
    pub fn new(client: Pan123Client, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    pub fn client(&self) -> &Pan123Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 从第一页开始翻页
    pub fn pages<'a>(&'a self, parent_id: i64, options: &'a ListOptions) -> PageCursor<'a> {
        let position = match options.api {
            ListingApi::CursorV2 => Position::Cursor(None),
            ListingApi::PagedV1 => Position::Page {
                page: 1,
                received: 0,
            },
        };
        PageCursor {
            lister: self,
            parent_id,
            options,
            position,
            seen: HashSet::new(),
            done: false,
        }
    }

    /// 列出目录下全部子项（保持接口返回顺序，按 ID 去重）
    pub async fn list_all_children(
        &self,
        parent_id: i64,
        options: &ListOptions,
    ) -> PanResult<Vec<RemoteEntry>> {
        let mut cursor = self.pages(parent_id, options);
        let mut all = Vec::new();
        while let Some(page) = cursor.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    /// 查找指定名称与类型的子项，找到即停止翻页
    pub async fn find_child(
        &self,
        parent_id: i64,
        name: &str,
        kind: EntryKind,
        options: &ListOptions,
    ) -> PanResult<Option<RemoteEntry>> {
        let mut cursor = self.pages(parent_id, options);
        while let Some(page) = cursor.next_page().await? {
            if let Some(found) = page
                .into_iter()
                .find(|entry| entry.kind == kind && !entry.trashed && entry.name == name)
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// 单页请求的重试循环
    async fn with_retry<T, F, Fut>(&self, parent_id: i64, mut request: F) -> PanResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PanResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            check_cancelled(&self.cancel)?;

            let err = match request().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_interrupt() || !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.policy.max_attempts {
                warn!(
                    "获取目录 {} 列表失败，已重试 {} 次: {}",
                    parent_id, attempt, err
                );
                return Err(PanError::ListFailed {
                    parent_id,
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = self.policy.delay_for(attempt - 1, err.is_rate_limited());
            warn!(
                "获取目录 {} 列表失败 (第 {}/{} 次): {}，{:?} 后重试",
                parent_id, attempt, self.policy.max_attempts, err, delay
            );
            self.policy.backoff(attempt - 1, &err, &self.cancel).await?;
        }
    }
}
