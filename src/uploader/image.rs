// 图床上传
//
// 流程：预上传（可能秒传） -> 逐片获取签名地址并 PUT -> 上传完毕
// 上传完毕返回 async=true 时轮询异步结果直到拿到文件ID或超时

use crate::common::run_bounded;
use crate::error::{PanError, PanResult};
use crate::netdisk::oss::{is_image_name, OssCreateRequest};
use crate::netdisk::Pan123Client;
use crate::remote::retry::{check_cancelled, sleep_or_cancel, RetryPolicy};
use crate::uploader::chunk::{read_slice, Slice, SlicePlan};
use crate::uploader::engine::{UploadEngine, UploadMethod};
use crate::uploader::rapid_upload::RapidUploadChecker;
use serde::Serialize;
use std::path::Path;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 图床上传结果
#[derive(Debug, Clone, Serialize)]
pub struct ImageUploadOutcome {
    /// 图床文件ID（字符串）
    pub file_id: String,
    pub method: UploadMethod,
    pub etag: String,
    pub size: u64,
}

impl UploadEngine {
    /// 上传图片到图床目录 `parent_id`（根目录为空字符串）
    pub async fn upload_image(
        &self,
        local_path: &Path,
        parent_id: &str,
        filename: &str,
    ) -> PanResult<ImageUploadOutcome> {
        check_cancelled(self.cancel_token())?;
        if !is_image_name(filename) {
            return Err(PanError::Validation(format!("图床只支持图片格式: {}", filename)));
        }
        let hash = RapidUploadChecker::calculate_hash(local_path).await?;
        let request = OssCreateRequest::new(parent_id, filename, &hash.etag, hash.size);

        let oss = self.client().oss();
        let created = self
            .policy()
            .run(self.cancel_token(), "创建图床上传任务", || oss.create(&request))
            .await?;
        if created.is_instant() {
            info!("图床秒传成功: {} -> fileID={}", filename, created.file_id);
            return Ok(ImageUploadOutcome {
                file_id: created.file_id,
                method: UploadMethod::Instant,
                etag: hash.etag,
                size: hash.size,
            });
        }

        let plan = SlicePlan::new(hash.size, created.slice_size)?;
        info!(
            "图床分片上传: {} 共 {} 个分片，分片大小 {}",
            filename,
            plan.slice_count(),
            plan.slice_size
        );

        let slice_policy = self.policy().with_max_attempts(self.options().slice_attempts);
        let results = run_bounded(
            plan.slices,
            self.options().slice_workers,
            self.cancel_token(),
            |slice| {
                let client = self.client().clone();
                let policy = slice_policy.clone();
                let cancel = self.cancel_token().clone();
                let local_path = local_path.to_path_buf();
                let preupload_id = created.preupload_id.clone();
                async move {
                    put_one_slice(&client, &policy, &cancel, &local_path, &preupload_id, &slice).await
                }
            },
        )
        .await?;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                warn!("图床分片 {} 上传失败，中止上传: {}", index + 1, e);
                return Err(PanError::TransferFailed(format!(
                    "图床分片 {} 上传失败: {}",
                    index + 1,
                    e
                )));
            }
        }

        let file_id = self.finish_image(&created.preupload_id).await?;
        info!("图床上传完成: {} -> fileID={}", local_path.display(), file_id);
        Ok(ImageUploadOutcome {
            file_id,
            method: UploadMethod::Chunked,
            etag: hash.etag,
            size: hash.size,
        })
    }

    /// 上传完毕，必要时轮询异步结果
    async fn finish_image(&self, preupload_id: &str) -> PanResult<String> {
        let oss = self.client().oss();
        let cancel = self.cancel_token();
        let complete = self
            .policy()
            .run(cancel, "图床上传完毕", || oss.upload_complete(preupload_id))
            .await?;

        if !complete.is_async {
            if complete.completed && !complete.file_id.is_empty() {
                return Ok(complete.file_id);
            }
            return Err(PanError::TransferFailed(format!(
                "图床上传未完成: preuploadID={}",
                preupload_id
            )));
        }

        let started = Instant::now();
        let deadline = started + self.options().completion_timeout;
        let mut attempt = 0u32;
        loop {
            check_cancelled(cancel)?;
            match oss.upload_async_result(preupload_id).await {
                Ok(result) if result.completed && !result.file_id.is_empty() => {
                    return Ok(result.file_id)
                }
                Ok(_) => {
                    debug!("图床上传异步处理中: preuploadID={}", preupload_id);
                    attempt = 0;
                }
                Err(e) if e.is_interrupt() || !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!("查询图床上传结果失败，稍后重试: {}", e);
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
                self.options().poll_interval
            } else {
                self.options()
                    .poll_interval
                    .max(self.policy().delay_for(attempt - 1, false))
            };
            sleep_or_cancel(cancel, wait.min(deadline.saturating_duration_since(Instant::now()))).await?;
        }
    }
}

async fn put_one_slice(
    client: &Pan123Client,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    local_path: &Path,
    preupload_id: &str,
    slice: &Slice,
) -> PanResult<()> {
    check_cancelled(cancel)?;
    let data = read_slice(local_path, slice).await?;
    let oss = client.oss();
    let (oss, data) = (&oss, &data);

    // 签名地址有时效，每次重试都重新获取
    policy
        .run(cancel, &format!("上传图床分片 {}", slice.slice_no), move || async move {
            let url = oss.upload_url(preupload_id, slice.slice_no).await?;
            oss.put_slice(&url, data.clone()).await
        })
        .await
}
