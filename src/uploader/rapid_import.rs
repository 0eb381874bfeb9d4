// 秒传导入 / 导出
//
// 输入 JSON 的几种形态在边界处一次性解析为 RapidPayload：
// - 单文件: {"etag", "size", "path"}
// - 批量:   {"list": [...]} / {"data": [...]} / {"files": [...]}
// 其他形态直接返回参数错误

use crate::common::run_bounded;
use crate::error::{PanError, PanResult};
use crate::netdisk::client::{validate_etag, validate_filename};
use crate::netdisk::{CreateFileRequest, DuplicatePolicy, Pan123Client};
use crate::remote::retry::{check_cancelled, RetryPolicy};
use crate::remote::{join_remote, normalize_remote_path, RemoteEntry, ROOT_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 需要重试的接口 code：授权、限流、服务端繁忙
const RETRYABLE_CODES: [i64; 4] = [401, 429, 5000, 1];

/// 单个秒传条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RapidFileSpec {
    /// 小写 32 位 MD5
    pub etag: String,
    pub size: u64,
    /// 相对路径，可带目录
    pub path: String,
}

impl RapidFileSpec {
    fn from_value(value: &Value) -> PanResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| PanError::Validation(format!("秒传条目必须是对象: {}", value)))?;

        let etag = obj
            .get("etag")
            .and_then(Value::as_str)
            .ok_or_else(|| PanError::Validation("秒传条目缺少 etag".to_string()))?
            .to_ascii_lowercase();
        validate_etag(&etag)?;

        let size = match obj.get("size") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .ok_or_else(|| PanError::Validation(format!("秒传条目 size 无效: {:?}", obj.get("size"))))?;
        if size == 0 {
            return Err(PanError::Validation("秒传条目 size 必须大于 0".to_string()));
        }

        let path = obj
            .get("path")
            .and_then(Value::as_str)
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PanError::Validation("秒传条目缺少 path".to_string()))?;
        validate_filename(&path, true)?;

        Ok(Self { etag, size, path })
    }
}

/// 批量条目来自哪个字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKey {
    List,
    Data,
    Files,
}

impl BatchKey {
    fn key(self) -> &'static str {
        match self {
            BatchKey::List => "list",
            BatchKey::Data => "data",
            BatchKey::Files => "files",
        }
    }
}

/// 秒传输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RapidPayload {
    Single(RapidFileSpec),
    Batch {
        source: BatchKey,
        files: Vec<RapidFileSpec>,
    },
}

impl RapidPayload {
    /// 解析并校验；任何一项不合法都会让整个输入失败
    pub fn from_value(value: &Value) -> PanResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| PanError::Validation("秒传数据必须是 JSON 对象".to_string()))?;

        if ["etag", "size", "path"].iter().all(|k| obj.contains_key(*k)) {
            return Ok(RapidPayload::Single(RapidFileSpec::from_value(value)?));
        }

        for source in [BatchKey::List, BatchKey::Data, BatchKey::Files] {
            if let Some(Value::Array(items)) = obj.get(source.key()) {
                let files = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        RapidFileSpec::from_value(item).map_err(|e| {
                            PanError::Validation(format!("{}[{}]: {}", source.key(), i, e))
                        })
                    })
                    .collect::<PanResult<Vec<_>>>()?;
                return Ok(RapidPayload::Batch { source, files });
            }
        }

        Err(PanError::Validation(
            "秒传数据格式不正确，需包含 etag/size/path 或 list/data/files 数组".to_string(),
        ))
    }

    pub fn from_json_str(text: &str) -> PanResult<Self> {
        Self::from_value(&serde_json::from_str(text)?)
    }

    pub fn files(&self) -> &[RapidFileSpec] {
        match self {
            RapidPayload::Single(spec) => std::slice::from_ref(spec),
            RapidPayload::Batch { files, .. } => files,
        }
    }

    pub fn into_files(self) -> Vec<RapidFileSpec> {
        match self {
            RapidPayload::Single(spec) => vec![spec],
            RapidPayload::Batch { files, .. } => files,
        }
    }
}

/// 单项导入结果
#[derive(Debug, Clone, Serialize)]
pub struct RapidImportResult {
    pub path: String,
    /// 秒传成功
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RapidImportReport {
    pub results: Vec<RapidImportResult>,
    pub success_count: usize,
    pub failure_count: usize,
}

/// 导出格式（即 `files` 形态的批量输入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RapidExport {
    pub files: Vec<RapidFileSpec>,
}

/// 秒传导入器
#[derive(Clone)]
pub struct RapidImporter {
    client: Pan123Client,
    policy: RetryPolicy,
    duplicate: DuplicatePolicy,
    workers: usize,
    cancel: CancellationToken,
}

impl RapidImporter {
    pub fn new(client: Pan123Client, duplicate: DuplicatePolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            policy: RetryPolicy::fixed(3, Duration::from_secs(1)),
            duplicate,
            workers: 1,
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 导入到 `current_dir` 下（相对根目录，服务端按 containDir 建立目录）
    pub async fn import(&self, payload: RapidPayload, current_dir: &str) -> PanResult<RapidImportReport> {
        let base = import_base(current_dir)?;
        let files = payload.into_files();
        info!("开始秒传导入: {} 个文件 -> {}", files.len(), base);

        let outcomes = run_bounded(files, self.workers, &self.cancel, |spec| {
            let importer = self.clone();
            let filename = join_remote(&base, &spec.path);
            async move {
                match importer.import_one(&spec, &filename).await {
                    Err(e) if e.is_interrupt() => Err(e),
                    result => Ok((filename, result)),
                }
            }
        })
        .await?;

        let mut report = RapidImportReport::default();
        for outcome in outcomes {
            let (path, result) = outcome?;
            let item = match result {
                Ok(Some(file_id)) => RapidImportResult {
                    path,
                    reused: true,
                    file_id: Some(file_id),
                    error: None,
                },
                Ok(None) => RapidImportResult {
                    path,
                    reused: false,
                    file_id: None,
                    error: Some("服务端没有相同内容，无法秒传".to_string()),
                },
                Err(e) => RapidImportResult {
                    path,
                    reused: false,
                    file_id: None,
                    error: Some(e.to_string()),
                },
            };
            if item.reused {
                report.success_count += 1;
            } else {
                warn!("秒传失败: {} ({})", item.path, item.error.as_deref().unwrap_or(""));
                report.failure_count += 1;
            }
            report.results.push(item);
        }

        info!(
            "秒传导入结束: {} 成功, {} 失败",
            report.success_count, report.failure_count
        );
        Ok(report)
    }

    /// 成功秒传返回 Some(fileID)，服务端没有相同内容返回 None
    async fn import_one(&self, spec: &RapidFileSpec, filename: &str) -> PanResult<Option<i64>> {
        let request = CreateFileRequest {
            parent_file_id: ROOT_ID,
            filename: filename.to_string(),
            etag: spec.etag.clone(),
            size: spec.size,
            duplicate: self.duplicate.code(),
            contain_dir: true,
        };

        let mut attempt = 0u32;
        loop {
            check_cancelled(&self.cancel)?;
            match self.client.create_upload(&request).await {
                Ok(data) if data.is_instant() => {
                    debug!("秒传成功: {} -> fileID={}", filename, data.file_id);
                    return Ok(Some(data.file_id));
                }
                Ok(_) => return Ok(None),
                Err(e) if is_retryable(&e) && attempt + 1 < self.policy.max_attempts => {
                    debug!("秒传请求失败，稍后重试: {}: {}", filename, e);
                    self.policy.backoff(attempt, &e, &self.cancel).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(err: &PanError) -> bool {
    match err {
        PanError::Api { code, .. } => RETRYABLE_CODES.contains(code),
        PanError::RateLimited => true,
        PanError::Http { status, .. } => *status == 401 || *status == 429,
        _ => false,
    }
}

/// 导入目录规范化为绝对路径
fn import_base(current_dir: &str) -> PanResult<String> {
    let trimmed = current_dir.trim();
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    if trimmed.starts_with('/') {
        normalize_remote_path(trimmed)
    } else {
        normalize_remote_path(&format!("/{}", trimmed))
    }
}

/// 由遍历结果生成导出数据（只含文件，路径相对于遍历根目录）
pub fn export_entries(entries: &[RemoteEntry]) -> RapidExport {
    let files = entries
        .iter()
        .filter(|e| e.is_file() && e.size > 0 && e.etag.len() == 32)
        .map(|e| RapidFileSpec {
            etag: e.etag.to_ascii_lowercase(),
            size: e.size,
            path: e.relative_path.clone(),
        })
        .collect();
    RapidExport { files }
}
