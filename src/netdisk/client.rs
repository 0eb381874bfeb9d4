// 123 云盘开放平台客户端实现

use crate::config::ApiConfig;
use crate::error::{PanError, PanResult};
use crate::netdisk::directlink::DirectLinkApi;
use crate::netdisk::offline::OfflineApi;
use crate::netdisk::oss::OssApi;
use crate::netdisk::rate_limit::RateLimiter;
use crate::netdisk::share::ShareApi;
use crate::netdisk::transport::{ApiRequest, ApiTransport, MultipartUpload, RawResponse};
use crate::netdisk::types::*;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// 单步上传接口的大小上限（1GB）
pub const SINGLE_UPLOAD_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// 文件名最大长度
pub const MAX_FILENAME_CHARS: usize = 255;

/// 文件名中不允许出现的字符
const FORBIDDEN_NAME_CHARS: &[char] = &['"', '\\', '/', ':', '*', '?', '|', '>', '<'];

/// 批量操作（删除/移动/恢复等）单次最多的文件数
pub const MAX_BATCH_IDS: usize = 100;

/// 批量重命名单次最多条数
pub const MAX_RENAME_BATCH: usize = 30;

/// 单页最多条目数
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 搜索条件（list v2）
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keyword: String,
    /// true 为精准搜索，false 为模糊搜索
    pub exact: bool,
}

/// 123 云盘客户端
///
/// 只负责请求构造与响应解码，重试策略由上层决定
#[derive(Clone)]
pub struct Pan123Client {
    transport: Arc<dyn ApiTransport>,
    /// list v2 限速
    list_limiter: Arc<RateLimiter>,
    /// list v1 限速
    list_v1_limiter: Arc<RateLimiter>,
    /// 创建文件限速
    create_limiter: Arc<RateLimiter>,
}

impl Pan123Client {
    pub fn new(transport: Arc<dyn ApiTransport>, config: &ApiConfig) -> Self {
        Self {
            transport,
            list_limiter: Arc::new(RateLimiter::per_second(config.list_rate_per_sec)),
            list_v1_limiter: Arc::new(RateLimiter::per_second(config.list_v1_rate_per_sec)),
            create_limiter: Arc::new(RateLimiter::per_second(config.create_rate_per_sec)),
        }
    }

    /// 不限速的客户端
    pub fn unthrottled(transport: Arc<dyn ApiTransport>) -> Self {
        Self {
            transport,
            list_limiter: Arc::new(RateLimiter::unlimited()),
            list_v1_limiter: Arc::new(RateLimiter::unlimited()),
            create_limiter: Arc::new(RateLimiter::unlimited()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn ApiTransport> {
        &self.transport
    }

    pub fn share(&self) -> ShareApi<'_> {
        ShareApi::new(self)
    }

    pub fn offline(&self) -> OfflineApi<'_> {
        OfflineApi::new(self)
    }

    /// 图床接口
    pub fn oss(&self) -> OssApi<'_> {
        OssApi::new(self)
    }

    pub fn directlink(&self) -> DirectLinkApi<'_> {
        DirectLinkApi::new(self)
    }

    // =====================================================
    // 请求与响应解码
    // =====================================================

    /// 发送请求并解出 `data` 字段
    pub(crate) async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> PanResult<T> {
        let path = request.path.clone();
        let raw = self.transport.send(request).await?;
        let envelope = decode_envelope(&raw)?;
        decode_data(&path, envelope_data(envelope)?)
    }

    /// 只关心是否成功的请求
    pub(crate) async fn call_unit(&self, request: ApiRequest) -> PanResult<()> {
        let raw = self.transport.send(request).await?;
        envelope_data(decode_envelope(&raw)?).map(|_| ())
    }

    // =====================================================
    // 用户
    // =====================================================

    /// 获取用户信息
    pub async fn user_info(&self) -> PanResult<UserInfo> {
        self.call(ApiRequest::get("/api/v1/user/info")).await
    }

    // =====================================================
    // 文件管理
    // =====================================================

    /// 创建目录，返回新目录ID
    pub async fn mkdir(&self, name: &str, parent_id: i64) -> PanResult<i64> {
        validate_filename(name, false)?;
        debug!("创建目录: name={}, parent={}", name, parent_id);

        let data: MkdirData = self
            .call(ApiRequest::post(
                "/upload/v1/file/mkdir",
                json!({ "name": name, "parentID": parent_id }),
            ))
            .await?;
        Ok(data.dir_id)
    }

    /// 重命名单个文件
    pub async fn rename_one(&self, file_id: i64, name: &str) -> PanResult<()> {
        validate_filename(name, false)?;
        self.call_unit(ApiRequest::put(
            "/api/v1/file/name",
            json!({ "fileId": file_id, "fileName": name }),
        ))
        .await
    }

    /// 批量重命名（每次最多 30 个）
    pub async fn rename_batch(&self, items: &[(i64, String)]) -> PanResult<()> {
        if items.is_empty() || items.len() > MAX_RENAME_BATCH {
            return Err(PanError::Validation(format!(
                "批量重命名数量必须在 1-{} 之间: {}",
                MAX_RENAME_BATCH,
                items.len()
            )));
        }
        for (_, name) in items {
            validate_filename(name, false)?;
        }

        let rename_list: Vec<String> = items
            .iter()
            .map(|(id, name)| format!("{}|{}", id, name))
            .collect();
        self.call_unit(ApiRequest::post(
            "/api/v1/file/rename",
            json!({ "renameList": rename_list }),
        ))
        .await
    }

    /// 移入回收站
    pub async fn trash(&self, file_ids: &[i64]) -> PanResult<()> {
        validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        self.call_unit(ApiRequest::post(
            "/api/v1/file/trash",
            json!({ "fileIDs": file_ids }),
        ))
        .await
    }

    /// 彻底删除（只能删除回收站中的文件）
    pub async fn delete(&self, file_ids: &[i64]) -> PanResult<()> {
        validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        self.call_unit(ApiRequest::post(
            "/api/v1/file/delete",
            json!({ "fileIDs": file_ids }),
        ))
        .await
    }

    /// 从回收站恢复到原位置
    pub async fn recover(&self, file_ids: &[i64]) -> PanResult<()> {
        validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        self.call_unit(ApiRequest::post(
            "/api/v1/file/recover",
            json!({ "fileIDs": file_ids }),
        ))
        .await
    }

    /// 从回收站恢复到指定目录
    pub async fn recover_by_path(&self, file_ids: &[i64], parent_id: i64) -> PanResult<()> {
        validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        self.call_unit(ApiRequest::post(
            "/api/v1/file/recover/by_path",
            json!({ "fileIDs": file_ids, "parentFileID": parent_id }),
        ))
        .await
    }

    /// 单个文件详情
    pub async fn detail(&self, file_id: i64) -> PanResult<FileInfo> {
        self.call(ApiRequest::get("/api/v1/file/detail").query("fileID", file_id))
            .await
    }

    /// 批量文件详情
    pub async fn infos(&self, file_ids: &[i64]) -> PanResult<Vec<FileInfo>> {
        validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        let data: FileInfosData = self
            .call(ApiRequest::post(
                "/api/v1/file/infos",
                json!({ "fileIds": file_ids }),
            ))
            .await?;
        Ok(data.file_list)
    }

    /// 移动文件
    pub async fn move_files(&self, file_ids: &[i64], to_parent_id: i64) -> PanResult<()> {
        validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        self.call_unit(ApiRequest::post(
            "/api/v1/file/move",
            json!({ "fileIDs": file_ids, "toParentFileID": to_parent_id }),
        ))
        .await
    }

    /// 获取文件列表（v2，游标翻页）
    ///
    /// `last_file_id` 为 None 时获取第一页
    pub async fn list_v2(
        &self,
        parent_id: i64,
        limit: u32,
        last_file_id: Option<i64>,
        search: Option<&SearchQuery>,
    ) -> PanResult<FileListV2Data> {
        validate_page_limit(limit)?;
        self.list_limiter.acquire().await;

        let mut request = ApiRequest::get("/api/v2/file/list")
            .query("parentFileId", parent_id)
            .query("limit", limit)
            .query_opt("lastFileId", last_file_id);
        if let Some(search) = search {
            request = request
                .query("searchData", &search.keyword)
                .query("searchMode", if search.exact { 1 } else { 0 });
        }

        self.call(request).await
    }

    /// 获取文件列表（v1，页码翻页，page 从 1 开始）
    pub async fn list_v1(&self, parent_id: i64, page: u32, limit: u32) -> PanResult<FileListV1Data> {
        validate_page_limit(limit)?;
        if page == 0 {
            return Err(PanError::Validation("page 从 1 开始".to_string()));
        }
        self.list_v1_limiter.acquire().await;

        self.call(
            ApiRequest::get("/api/v1/file/list")
                .query("parentFileId", parent_id)
                .query("page", page)
                .query("limit", limit)
                .query("orderBy", "file_id")
                .query("orderDirection", "asc")
                .query("trashed", false),
        )
        .await
    }

    /// 获取下载地址
    pub async fn download_info(&self, file_id: i64) -> PanResult<String> {
        let data: DownloadInfoData = self
            .call(ApiRequest::get("/api/v1/file/download_info").query("fileId", file_id))
            .await?;
        if data.download_url.is_empty() {
            return Err(PanError::Malformed(format!(
                "文件 {} 的下载地址为空",
                file_id
            )));
        }
        Ok(data.download_url)
    }

    // =====================================================
    // 上传
    // =====================================================

    /// 创建上传任务
    ///
    /// 返回 reuse=true 表示秒传成功，否则返回分片上传会话
    pub async fn create_upload(&self, request: &CreateFileRequest) -> PanResult<CreateFileData> {
        validate_create_request(request)?;
        self.create_limiter.acquire().await;

        debug!(
            "创建上传任务: parent={}, filename={}, size={}, etag={}",
            request.parent_file_id, request.filename, request.size, request.etag
        );
        self.call(ApiRequest::post(
            "/upload/v2/file/create",
            serde_json::to_value(request)?,
        ))
        .await
    }

    /// 上传一个分片（slice_no 从 1 开始）
    pub async fn upload_slice(
        &self,
        server: &str,
        preupload_id: &str,
        slice_no: u32,
        slice_md5: &str,
        data: Vec<u8>,
    ) -> PanResult<()> {
        if slice_no == 0 {
            return Err(PanError::Validation("sliceNo 从 1 开始".to_string()));
        }

        let url = format!("{}/upload/v2/file/slice", server.trim_end_matches('/'));
        let upload = MultipartUpload {
            fields: vec![
                ("preuploadID".to_string(), preupload_id.to_string()),
                ("sliceNo".to_string(), slice_no.to_string()),
                ("sliceMD5".to_string(), slice_md5.to_string()),
            ],
            file_field: "slice".to_string(),
            file_name: format!("slice{}", slice_no),
            data,
        };

        let raw = self.transport.send_multipart(&url, upload).await?;
        envelope_data(decode_envelope(&raw)?).map(|_| ())
    }

    /// 通知服务端所有分片已上传
    pub async fn upload_complete(&self, preupload_id: &str) -> PanResult<CompletionStatus> {
        let raw = self
            .transport
            .send(ApiRequest::post(
                "/upload/v2/file/upload_complete",
                json!({ "preuploadID": preupload_id }),
            ))
            .await?;

        let envelope = decode_envelope(&raw)?;
        if envelope.code == CODE_VERIFYING {
            return Ok(CompletionStatus::Verifying);
        }

        let data: UploadCompleteData =
            decode_data("/upload/v2/file/upload_complete", envelope_data(envelope)?)?;
        if data.completed && data.file_id != 0 {
            Ok(CompletionStatus::Completed {
                file_id: data.file_id,
            })
        } else {
            Ok(CompletionStatus::Pending)
        }
    }

    /// 获取单步上传域名
    pub async fn upload_domains(&self) -> PanResult<Vec<String>> {
        self.call(ApiRequest::get("/upload/v2/file/domain")).await
    }

    /// 单步上传（不超过 1GB，无需先创建任务）
    pub async fn single_upload(
        &self,
        domain: &str,
        request: &CreateFileRequest,
        data: Vec<u8>,
    ) -> PanResult<SingleUploadData> {
        validate_create_request(request)?;
        if request.size > SINGLE_UPLOAD_MAX_BYTES {
            return Err(PanError::Validation(format!(
                "单步上传文件不能超过 1GB: {} 字节",
                request.size
            )));
        }
        if data.len() as u64 != request.size {
            return Err(PanError::Validation(format!(
                "上传数据长度 {} 与声明大小 {} 不一致",
                data.len(),
                request.size
            )));
        }
        self.create_limiter.acquire().await;

        let url = format!(
            "{}/upload/v2/file/single/create",
            domain.trim_end_matches('/')
        );
        let file_name = request
            .filename
            .rsplit('/')
            .next()
            .unwrap_or(&request.filename)
            .to_string();
        let upload = MultipartUpload {
            fields: vec![
                ("parentFileID".to_string(), request.parent_file_id.to_string()),
                ("filename".to_string(), request.filename.clone()),
                ("etag".to_string(), request.etag.clone()),
                ("size".to_string(), request.size.to_string()),
                ("duplicate".to_string(), request.duplicate.to_string()),
                ("containDir".to_string(), request.contain_dir.to_string()),
            ],
            file_field: "file".to_string(),
            file_name,
            data,
        };

        let raw = self.transport.send_multipart(&url, upload).await?;
        decode_data(
            "/upload/v2/file/single/create",
            envelope_data(decode_envelope(&raw)?)?,
        )
    }
}

// =====================================================
// 解码
// =====================================================

/// 解析响应信封；429 统一转为 RateLimited
pub(crate) fn decode_envelope(raw: &RawResponse) -> PanResult<ApiEnvelope> {
    if raw.status == 429 {
        return Err(PanError::RateLimited);
    }

    let envelope: ApiEnvelope = match serde_json::from_str(&raw.body) {
        Ok(envelope) => envelope,
        Err(e) if raw.status >= 400 => {
            debug!("HTTP {} 响应无法解析: {}", raw.status, e);
            return Err(PanError::Http {
                status: raw.status,
                body: raw.body.clone(),
            });
        }
        Err(e) => {
            return Err(PanError::Malformed(format!(
                "{}, body={}",
                e,
                truncate(&raw.body, 200)
            )))
        }
    };

    if envelope.code == 429 {
        return Err(PanError::RateLimited);
    }
    if envelope.code == 0 && raw.status >= 400 {
        return Err(PanError::Http {
            status: raw.status,
            body: raw.body.clone(),
        });
    }
    Ok(envelope)
}

fn envelope_data(envelope: ApiEnvelope) -> PanResult<Value> {
    if !envelope.is_success() {
        if !envelope.trace_id.is_empty() {
            warn!(
                "接口返回错误 code={}, message={}, traceID={}",
                envelope.code, envelope.message, envelope.trace_id
            );
        }
        return Err(PanError::Api {
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(envelope.data)
}

fn decode_data<T: DeserializeOwned>(path: &str, data: Value) -> PanResult<T> {
    serde_json::from_value(data).map_err(|e| PanError::Malformed(format!("{}: {}", path, e)))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// =====================================================
// 参数校验
// =====================================================

/// 文件ID列表：非空且不超过上限
pub fn validate_file_ids(file_ids: &[i64], max: usize) -> PanResult<()> {
    if file_ids.is_empty() {
        return Err(PanError::Validation("文件ID列表不能为空".to_string()));
    }
    if file_ids.len() > max {
        return Err(PanError::Validation(format!(
            "文件ID列表最多 {} 个，当前 {} 个",
            max,
            file_ids.len()
        )));
    }
    Ok(())
}

fn validate_page_limit(limit: u32) -> PanResult<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(PanError::Validation(format!(
            "limit 必须在 1-{} 之间: {}",
            MAX_PAGE_LIMIT, limit
        )));
    }
    Ok(())
}

/// etag 必须是 32 位十六进制 MD5
pub fn validate_etag(etag: &str) -> PanResult<()> {
    if etag.len() != 32 || !etag.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PanError::Validation(format!("无效的 etag: {:?}", etag)));
    }
    Ok(())
}

/// 文件名校验
///
/// `contain_dir` 为 true 时按 `/` 分段逐段检查
pub fn validate_filename(name: &str, contain_dir: bool) -> PanResult<()> {
    if name.chars().count() > MAX_FILENAME_CHARS {
        return Err(PanError::Validation(format!(
            "文件名不能超过 {} 个字符: {}",
            MAX_FILENAME_CHARS, name
        )));
    }

    let segments: Vec<&str> = if contain_dir {
        name.split('/').filter(|s| !s.is_empty()).collect()
    } else {
        vec![name]
    };
    if segments.is_empty() {
        return Err(PanError::Validation("文件名不能为空".to_string()));
    }

    for segment in segments {
        if segment.trim().is_empty() {
            return Err(PanError::Validation(format!(
                "文件名不能全部是空格: {:?}",
                name
            )));
        }
        if let Some(c) = segment.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
            return Err(PanError::Validation(format!(
                "文件名包含非法字符 {:?}: {}",
                c, name
            )));
        }
    }
    Ok(())
}

fn validate_create_request(request: &CreateFileRequest) -> PanResult<()> {
    validate_etag(&request.etag)?;
    validate_filename(&request.filename, request.contain_dir)?;
    if request.size == 0 {
        return Err(PanError::Validation(format!(
            "不支持上传空文件: {}",
            request.filename
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDrive;

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_decode_envelope_classification() {
        assert!(matches!(
            decode_envelope(&raw(429, "")),
            Err(PanError::RateLimited)
        ));
        assert!(matches!(
            decode_envelope(&raw(200, r#"{"code":429,"message":"too many"}"#)),
            Err(PanError::RateLimited)
        ));
        assert!(matches!(
            decode_envelope(&raw(200, "<html>")),
            Err(PanError::Malformed(_))
        ));
        assert!(matches!(
            decode_envelope(&raw(502, "<html>bad gateway")),
            Err(PanError::Http { status: 502, .. })
        ));

        let env = decode_envelope(&raw(200, r#"{"code":5066,"message":"不存在"}"#)).unwrap();
        assert!(matches!(
            envelope_data(env),
            Err(PanError::Api { code: 5066, .. })
        ));
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report.txt", false).is_ok());
        assert!(validate_filename("a/b/c.txt", true).is_ok());
        assert!(validate_filename("a/b/c.txt", false).is_err());
        assert!(validate_filename("bad:name", false).is_err());
        assert!(validate_filename("   ", false).is_err());
        assert!(validate_filename("", false).is_err());
        assert!(validate_filename(&"x".repeat(256), false).is_err());
        assert!(validate_filename("中文文件名.pdf", false).is_ok());
    }

    #[test]
    fn test_validate_etag() {
        assert!(validate_etag("0123456789abcdef0123456789ABCDEF").is_ok());
        assert!(validate_etag("abc").is_err());
        assert!(validate_etag("g123456789abcdef0123456789abcdef").is_err());
    }

    #[tokio::test]
    async fn test_oversized_batch_fails_before_request() {
        let drive = FakeDrive::new();
        let client = drive.client();

        let ids: Vec<i64> = (1..=101).collect();
        assert!(matches!(
            client.trash(&ids).await,
            Err(PanError::Validation(_))
        ));
        assert!(matches!(
            client.move_files(&[], 1).await,
            Err(PanError::Validation(_))
        ));
        let renames: Vec<(i64, String)> = (1..=31).map(|i| (i, format!("n{}", i))).collect();
        assert!(matches!(
            client.rename_batch(&renames).await,
            Err(PanError::Validation(_))
        ));
        assert!(matches!(
            client.list_v2(0, 101, None, None).await,
            Err(PanError::Validation(_))
        ));

        assert_eq!(drive.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mkdir_and_list_through_fake_drive() {
        let drive = FakeDrive::new();
        let client = drive.client();

        let dir_id = client.mkdir("docs", 0).await.unwrap();
        let page = client.list_v2(0, 100, None, None).await.unwrap();

        assert!(page.is_last_page());
        assert_eq!(page.file_list.len(), 1);
        assert_eq!(page.file_list[0].file_id, dir_id);
        assert!(page.file_list[0].is_directory());
    }
}
