// 上传引擎实现
//
// 按文件大小分派：
// - 达到分片阈值（或超过单步上传上限）：创建任务 -> 秒传 / 分片上传 -> 完成确认轮询
// - 其余：单步上传（服务端同样可能直接秒传）
//
// 分片并发：
// - Semaphore 控制同时上传的分片数
// - JoinSet 收集每个分片的结果，任一分片失败即中止整个上传

use crate::config::UploadConfig;
use crate::error::{PanError, PanResult};
use crate::netdisk::client::validate_filename;
use crate::netdisk::{CompletionStatus, CreateFileRequest, DuplicatePolicy, Pan123Client};
use crate::remote::retry::{check_cancelled, sleep_or_cancel, RetryPolicy};
use crate::uploader::chunk::{read_slice, Slice, UploadSession};
use crate::uploader::rapid_upload::{md5_hex, FileHash, RapidUploadChecker};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 上传参数
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 达到该大小使用分片上传
    pub chunk_threshold: u64,
    /// 单步上传上限
    pub single_limit: u64,
    /// 单文件并发分片数
    pub slice_workers: usize,
    /// 单个分片最大尝试次数
    pub slice_attempts: u32,
    pub duplicate: DuplicatePolicy,
    pub completion_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl UploadOptions {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            chunk_threshold: config.chunk_threshold_bytes(),
            single_limit: config.single_limit_bytes(),
            slice_workers: config.slice_workers.max(1),
            slice_attempts: config.slice_attempts.max(1),
            duplicate: config.duplicate,
            completion_timeout: config.completion_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// 上传目标
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub parent_id: i64,
    /// 文件名；contain_dir 为 true 时可带相对目录
    pub filename: String,
    pub contain_dir: bool,
}

impl UploadTarget {
    pub fn file(parent_id: i64, filename: impl Into<String>) -> Self {
        Self {
            parent_id,
            filename: filename.into(),
            contain_dir: false,
        }
    }

    pub fn with_dirs(parent_id: i64, relative_path: impl Into<String>) -> Self {
        Self {
            parent_id,
            filename: relative_path.into(),
            contain_dir: true,
        }
    }
}

/// 实际采用的上传方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    /// 秒传，未传输数据
    Instant,
    /// 单步上传
    Single,
    /// 分片上传
    Chunked,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub file_id: i64,
    pub method: UploadMethod,
    pub etag: String,
    pub size: u64,
}

/// 上传引擎
#[derive(Clone)]
pub struct UploadEngine {
    client: Pan123Client,
    options: UploadOptions,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl UploadEngine {
    pub fn new(
        client: Pan123Client,
        options: UploadOptions,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            options,
            policy,
            cancel,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn client(&self) -> &Pan123Client {
        &self.client
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 上传单个文件
    pub async fn upload_file(&self, local_path: &Path, target: &UploadTarget) -> PanResult<UploadOutcome> {
        check_cancelled(&self.cancel)?;
        validate_filename(&target.filename, target.contain_dir)?;
        let hash = RapidUploadChecker::calculate_hash(local_path).await?;

        let chunked = hash.size >= self.options.chunk_threshold || hash.size > self.options.single_limit;
        info!(
            "开始上传: {} -> {} (父目录={}, 大小={}, 方式={})",
            local_path.display(),
            target.filename,
            target.parent_id,
            hash.size,
            if chunked { "分片" } else { "单步" }
        );

        let outcome = if chunked {
            self.upload_chunked(local_path, target, &hash).await?
        } else {
            self.upload_single(local_path, target, &hash).await?
        };

        info!(
            "上传完成: {} -> fileID={} ({:?})",
            local_path.display(),
            outcome.file_id,
            outcome.method
        );
        Ok(outcome)
    }

    fn create_request(&self, target: &UploadTarget, hash: &FileHash) -> CreateFileRequest {
        CreateFileRequest {
            parent_file_id: target.parent_id,
            filename: target.filename.clone(),
            etag: hash.etag.clone(),
            size: hash.size,
            duplicate: self.options.duplicate.code(),
            contain_dir: target.contain_dir,
        }
    }

    /// 分片上传（含秒传判断）
    pub async fn upload_chunked(
        &self,
        local_path: &Path,
        target: &UploadTarget,
        hash: &FileHash,
    ) -> PanResult<UploadOutcome> {
        let request = self.create_request(target, hash);
        let created = self
            .policy
            .run(&self.cancel, "创建上传任务", || self.client.create_upload(&request))
            .await?;

        if created.is_instant() {
            info!("秒传成功: {} -> fileID={}", target.filename, created.file_id);
            return Ok(UploadOutcome {
                file_id: created.file_id,
                method: UploadMethod::Instant,
                etag: hash.etag.clone(),
                size: hash.size,
            });
        }

        let (mut session, plan) = UploadSession::from_create(&created, hash.size)?;
        info!(
            "分片上传: {} 共 {} 个分片，分片大小 {}，服务器 {}",
            target.filename,
            plan.slice_count(),
            session.slice_size,
            session.upload_server
        );

        self.upload_slices(local_path, &mut session, plan.slices).await?;
        let file_id = self.wait_for_completion(&session.preupload_id).await?;

        Ok(UploadOutcome {
            file_id,
            method: UploadMethod::Chunked,
            etag: hash.etag.clone(),
            size: hash.size,
        })
    }

    /// 并发上传全部分片，任一分片失败则整体失败
    async fn upload_slices(
        &self,
        local_path: &Path,
        session: &mut UploadSession,
        slices: Vec<Slice>,
    ) -> PanResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.options.slice_workers));
        let mut join_set: JoinSet<(u32, PanResult<()>)> = JoinSet::new();
        let slice_policy = self.policy.with_max_attempts(self.options.slice_attempts);

        for slice in slices {
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let cancel = self.cancel.clone();
            let policy = slice_policy.clone();
            let local_path: PathBuf = local_path.to_path_buf();
            let server = session.upload_server.clone();
            let preupload_id = session.preupload_id.clone();

            join_set.spawn(async move {
                let slice_no = slice.slice_no;
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (slice_no, Err(PanError::Interrupted)),
                };
                let result = upload_one_slice(
                    &client,
                    &policy,
                    &cancel,
                    &local_path,
                    &server,
                    &preupload_id,
                    &slice,
                )
                .await;
                (slice_no, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (slice_no, result) = joined
                .map_err(|e| PanError::TransferFailed(format!("分片任务异常退出: {}", e)))?;

            match result {
                Ok(()) => {
                    session.mark_done(slice_no);
                    debug!(
                        "分片 {} 上传完成 ({}/{})",
                        slice_no,
                        session.completed_parts(),
                        session.total_parts()
                    );
                }
                Err(e) => {
                    join_set.abort_all();
                    if e.is_interrupt() {
                        return Err(e);
                    }
                    warn!("分片 {} 上传失败，中止上传: {}", slice_no, e);
                    return Err(PanError::TransferFailed(format!(
                        "分片 {} 上传失败: {}",
                        slice_no, e
                    )));
                }
            }
        }

        if !session.is_complete() {
            return Err(PanError::TransferFailed(format!(
                "分片未全部完成: {}/{}",
                session.completed_parts(),
                session.total_parts()
            )));
        }
        Ok(())
    }

    /// 轮询上传完成接口，直到返回文件ID或超时
    pub async fn wait_for_completion(&self, preupload_id: &str) -> PanResult<i64> {
        let started = Instant::now();
        let deadline = started + self.options.completion_timeout;
        let mut attempt = 0u32;

        loop {
            check_cancelled(&self.cancel)?;

            match self.client.upload_complete(preupload_id).await {
                Ok(CompletionStatus::Completed { file_id }) => return Ok(file_id),
                Ok(status) => {
                    debug!("上传完成确认中: preuploadID={} {:?}", preupload_id, status);
                    attempt = 0;
                }
                Err(e) if e.is_interrupt() || !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!("上传完成确认请求失败，稍后重试: {}", e);
                    attempt += 1;
                }
            }

            if Instant::now() >= deadline {
                return Err(PanError::CompletionTimeout {
                    preupload_id: preupload_id.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            let wait = if attempt == 0 {
                self.options.poll_interval
            } else {
                self.options
                    .poll_interval
                    .max(self.policy.delay_for(attempt - 1, false))
            };
            sleep_or_cancel(&self.cancel, wait.min(deadline.saturating_duration_since(Instant::now())))
                .await?;
        }
    }

    /// 单步上传
    pub async fn upload_single(
        &self,
        local_path: &Path,
        target: &UploadTarget,
        hash: &FileHash,
    ) -> PanResult<UploadOutcome> {
        let request = self.create_request(target, hash);

        let domains = self
            .policy
            .run(&self.cancel, "获取上传域名", || self.client.upload_domains())
            .await?;
        let domain = domains
            .first()
            .cloned()
            .ok_or_else(|| PanError::Malformed("未返回上传域名".to_string()))?;

        let data = tokio::fs::read(local_path).await?;
        if data.len() as u64 != hash.size {
            return Err(PanError::TransferFailed(format!(
                "文件在上传过程中被修改: {}",
                local_path.display()
            )));
        }

        check_cancelled(&self.cancel)?;
        let result = self.client.single_upload(&domain, &request, data).await?;
        if !result.completed || result.file_id == 0 {
            return Err(PanError::TransferFailed(format!(
                "单步上传未完成: {}",
                target.filename
            )));
        }

        Ok(UploadOutcome {
            file_id: result.file_id,
            method: if result.reuse {
                UploadMethod::Instant
            } else {
                UploadMethod::Single
            },
            etag: hash.etag.clone(),
            size: hash.size,
        })
    }
}

async fn upload_one_slice(
    client: &Pan123Client,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    local_path: &Path,
    server: &str,
    preupload_id: &str,
    slice: &Slice,
) -> PanResult<()> {
    check_cancelled(cancel)?;
    let data = read_slice(local_path, slice).await?;
    let slice_md5 = md5_hex(&data);

    policy
        .run(cancel, &format!("上传分片 {}", slice.slice_no), || {
            client.upload_slice(server, preupload_id, slice.slice_no, &slice_md5, data.clone())
        })
        .await
}
