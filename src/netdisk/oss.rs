// 图床（OSS）接口
//
// 图床的文件与目录 ID 是字符串，根目录用空字符串表示；
// 上传走 预上传 -> 获取分片签名地址 -> PUT 分片 -> 完成（可能需要异步轮询）

use crate::error::{PanError, PanResult};
use crate::netdisk::client::{validate_etag, validate_filename, Pan123Client, MAX_BATCH_IDS, MAX_PAGE_LIMIT};
use crate::netdisk::offline::OfflineProgress;
use crate::netdisk::transport::ApiRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// 图床接口固定的业务类型
const OSS_TYPE: u8 = 1;

/// 图床支持的图片扩展名
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "gif", "jpeg", "tiff", "webp", "jpg", "tif", "svg", "bmp",
];

/// 复制来源：云盘
const COPY_SOURCE_DRIVE: &str = "1";

/// 文件名是否为图床支持的图片格式
pub fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OssDirectory {
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "dirID")]
    pub dir_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OssMkdirData {
    #[serde(default)]
    list: Vec<OssDirectory>,
}

/// 图床预上传参数
#[derive(Debug, Clone, Serialize)]
pub struct OssCreateRequest {
    /// 父目录ID，根目录为空
    #[serde(rename = "parentFileID")]
    pub parent_file_id: String,
    pub filename: String,
    pub etag: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl OssCreateRequest {
    pub fn new(parent_file_id: &str, filename: &str, etag: &str, size: u64) -> Self {
        Self {
            parent_file_id: parent_file_id.to_string(),
            filename: filename.to_string(),
            etag: etag.to_string(),
            size,
            kind: OSS_TYPE,
        }
    }
}

/// 图床预上传返回
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssCreateData {
    #[serde(rename = "fileID", default)]
    pub file_id: String,
    #[serde(rename = "preuploadID", default)]
    pub preupload_id: String,
    #[serde(default)]
    pub reuse: bool,
    #[serde(rename = "sliceSize", default)]
    pub slice_size: u64,
}

impl OssCreateData {
    pub fn is_instant(&self) -> bool {
        self.reuse && !self.file_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UploadUrlData {
    #[serde(rename = "presignedURL", default)]
    presigned_url: String,
}

/// 上传完毕接口返回
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssCompleteData {
    /// 为 true 时需要轮询异步结果
    #[serde(rename = "async", default)]
    pub is_async: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(rename = "fileID", default)]
    pub file_id: String,
}

/// 异步上传结果
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssAsyncResult {
    #[serde(default)]
    pub completed: bool,
    #[serde(rename = "fileID", default)]
    pub file_id: String,
}

/// 图床文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OssFileInfo {
    #[serde(rename = "fileId", default)]
    pub file_id: String,
    #[serde(default)]
    pub filename: String,
    /// 0 文件，1 目录
    #[serde(rename = "type", default)]
    pub kind: i32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub status: i32,
    #[serde(rename = "parentFileId", default)]
    pub parent_file_id: String,
    #[serde(rename = "downloadURL", default)]
    pub download_url: String,
    #[serde(rename = "userSelfURL", default)]
    pub user_self_url: String,
    #[serde(rename = "createAt", default)]
    pub create_at: String,
}

impl OssFileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == 1
    }
}

/// 图床列表查询
#[derive(Debug, Clone, Default)]
pub struct OssListQuery {
    /// 父目录ID，None 为根目录
    pub parent_file_id: Option<String>,
    pub limit: u32,
    /// 按创建时间筛选（秒级时间戳）
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// 翻页游标
    pub last_file_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssListData {
    /// 为 "-1" 时表示最后一页
    #[serde(rename = "lastFileId", default)]
    pub last_file_id: String,
    #[serde(rename = "fileList", default)]
    pub file_list: Vec<OssFileInfo>,
}

impl OssListData {
    pub fn is_last_page(&self) -> bool {
        self.last_file_id.is_empty() || self.last_file_id == "-1"
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TaskIdData {
    #[serde(rename = "taskID", deserialize_with = "id_as_string")]
    task_id: String,
}

/// 复制任务状态
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssCopyProgress {
    /// 0 进行中，1 结束，2 失败，3 等待
    #[serde(default)]
    pub status: i32,
    #[serde(rename = "failMsg", default)]
    pub fail_msg: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssCopyFailure {
    #[serde(rename = "fileId", default)]
    pub file_id: String,
    #[serde(default)]
    pub filename: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OssCopyFailures {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub list: Vec<OssCopyFailure>,
}

/// 图床离线迁移参数
#[derive(Debug, Clone, Default)]
pub struct OssOfflineRequest {
    pub url: String,
    /// 自定义文件名，必须带图片扩展名
    pub file_name: Option<String>,
    /// 保存目录，不支持根目录
    pub business_dir_id: Option<String>,
    pub callback_url: Option<String>,
}

/// 任务ID 可能是数字也可能是字符串
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("无效的任务ID: {}", other))),
    }
}

fn validate_oss_ids(file_ids: &[String]) -> PanResult<()> {
    if file_ids.is_empty() {
        return Err(PanError::Validation("文件ID列表不能为空".to_string()));
    }
    if file_ids.len() > MAX_BATCH_IDS {
        return Err(PanError::Validation(format!(
            "单次最多操作 {} 个文件，实际 {}",
            MAX_BATCH_IDS,
            file_ids.len()
        )));
    }
    if file_ids.iter().any(|id| id.is_empty()) {
        return Err(PanError::Validation("文件ID不能为空字符串".to_string()));
    }
    Ok(())
}

fn validate_limit(limit: u32) -> PanResult<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(PanError::Validation(format!(
            "每页数量必须在 1..={} 之间: {}",
            MAX_PAGE_LIMIT, limit
        )));
    }
    Ok(())
}

pub struct OssApi<'a> {
    client: &'a Pan123Client,
}

impl<'a> OssApi<'a> {
    pub(crate) fn new(client: &'a Pan123Client) -> Self {
        Self { client }
    }

    /// 创建图床目录，返回目录ID
    pub async fn mkdir(&self, name: &str, parent_id: &str) -> PanResult<String> {
        validate_filename(name, false)?;
        let data: OssMkdirData = self
            .client
            .call(ApiRequest::post(
                "/upload/v1/oss/file/mkdir",
                json!({ "name": name, "parentID": parent_id, "type": OSS_TYPE }),
            ))
            .await?;
        data.list
            .into_iter()
            .next()
            .map(|d| d.dir_id)
            .ok_or_else(|| PanError::Malformed(format!("创建图床目录未返回目录ID: {}", name)))
    }

    /// 图床预上传
    pub async fn create(&self, request: &OssCreateRequest) -> PanResult<OssCreateData> {
        validate_filename(&request.filename, false)?;
        validate_etag(&request.etag)?;
        if !is_image_name(&request.filename) {
            return Err(PanError::Validation(format!(
                "图床只支持图片格式: {}",
                request.filename
            )));
        }
        self.client
            .call(ApiRequest::post(
                "/upload/v1/oss/file/create",
                serde_json::to_value(request)?,
            ))
            .await
    }

    /// 获取分片的签名上传地址（slice_no 从 1 开始）
    pub async fn upload_url(&self, preupload_id: &str, slice_no: u32) -> PanResult<String> {
        if slice_no == 0 {
            return Err(PanError::Validation("sliceNo 从 1 开始".to_string()));
        }
        let data: UploadUrlData = self
            .client
            .call(ApiRequest::post(
                "/upload/v1/oss/file/get_upload_url",
                json!({ "preuploadID": preupload_id, "sliceNo": slice_no }),
            ))
            .await?;
        if data.presigned_url.is_empty() {
            return Err(PanError::Malformed(format!("分片 {} 未返回上传地址", slice_no)));
        }
        Ok(data.presigned_url)
    }

    /// PUT 分片数据到签名地址
    pub async fn put_slice(&self, presigned_url: &str, data: Vec<u8>) -> PanResult<()> {
        let raw = self.client.transport().put_bytes(presigned_url, data).await?;
        match raw.status {
            200..=299 => Ok(()),
            429 => Err(PanError::RateLimited),
            status => Err(PanError::Http {
                status,
                body: raw.body,
            }),
        }
    }

    /// 上传完毕
    pub async fn upload_complete(&self, preupload_id: &str) -> PanResult<OssCompleteData> {
        self.client
            .call(ApiRequest::post(
                "/upload/v1/oss/file/upload_complete",
                json!({ "preuploadID": preupload_id }),
            ))
            .await
    }

    /// 轮询异步上传结果
    pub async fn upload_async_result(&self, preupload_id: &str) -> PanResult<OssAsyncResult> {
        self.client
            .call(ApiRequest::post(
                "/upload/v1/oss/file/upload_async_result",
                json!({ "preuploadID": preupload_id }),
            ))
            .await
    }

    /// 把云盘里的图片复制到图床目录，返回任务ID
    pub async fn copy_from_drive(&self, file_ids: &[i64], to_parent_id: &str) -> PanResult<String> {
        crate::netdisk::client::validate_file_ids(file_ids, MAX_BATCH_IDS)?;
        let ids: Vec<String> = file_ids.iter().map(|id| id.to_string()).collect();
        let data: TaskIdData = self
            .client
            .call(ApiRequest::post(
                "/api/v1/oss/source/copy",
                json!({
                    "fileIDs": ids,
                    "toParentFileID": to_parent_id,
                    "sourceType": COPY_SOURCE_DRIVE,
                    "type": OSS_TYPE,
                }),
            ))
            .await?;
        Ok(data.task_id)
    }

    /// 复制任务详情
    pub async fn copy_process(&self, task_id: &str) -> PanResult<OssCopyProgress> {
        self.client
            .call(ApiRequest::get("/api/v1/oss/source/copy/process").query("taskID", task_id))
            .await
    }

    /// 复制失败的文件列表
    pub async fn copy_failures(&self, task_id: &str, limit: u32, page: u32) -> PanResult<OssCopyFailures> {
        validate_limit(limit)?;
        self.client
            .call(
                ApiRequest::get("/api/v1/oss/source/copy/fail")
                    .query("taskID", task_id)
                    .query("limit", limit)
                    .query("page", page.max(1)),
            )
            .await
    }

    pub async fn move_files(&self, file_ids: &[String], to_parent_id: &str) -> PanResult<()> {
        validate_oss_ids(file_ids)?;
        self.client
            .call_unit(ApiRequest::post(
                "/api/v1/oss/file/move",
                json!({ "fileIDs": file_ids, "toParentFileID": to_parent_id }),
            ))
            .await
    }

    pub async fn delete(&self, file_ids: &[String]) -> PanResult<()> {
        validate_oss_ids(file_ids)?;
        self.client
            .call_unit(ApiRequest::post(
                "/api/v1/oss/file/delete",
                json!({ "fileIDs": file_ids }),
            ))
            .await
    }

    pub async fn detail(&self, file_id: &str) -> PanResult<OssFileInfo> {
        self.client
            .call(ApiRequest::get("/api/v1/oss/file/detail").query("fileID", file_id))
            .await
    }

    /// 图片列表（单页）
    pub async fn list(&self, query: &OssListQuery) -> PanResult<OssListData> {
        validate_limit(query.limit)?;
        let mut body = json!({
            "parentFileId": query.parent_file_id.clone().unwrap_or_default(),
            "limit": query.limit,
            "type": OSS_TYPE,
        });
        if let Some(start) = query.start_time {
            body["startTime"] = json!(start);
        }
        if let Some(end) = query.end_time {
            body["endTime"] = json!(end);
        }
        if let Some(last) = &query.last_file_id {
            body["lastFileId"] = json!(last);
        }
        self.client
            .call(ApiRequest::post("/api/v1/oss/file/list", body))
            .await
    }

    /// 离线迁移图片到图床，返回任务ID
    pub async fn offline_download(&self, request: &OssOfflineRequest) -> PanResult<String> {
        if !(request.url.starts_with("http://") || request.url.starts_with("https://")) {
            return Err(PanError::Validation(format!(
                "离线下载只支持 http/https 地址: {}",
                request.url
            )));
        }
        if let Some(name) = &request.file_name {
            validate_filename(name, false)?;
            if !is_image_name(name) {
                return Err(PanError::Validation(format!("文件名需带图片扩展名: {}", name)));
            }
        }
        if request.business_dir_id.as_deref() == Some("") {
            return Err(PanError::Validation("离线下载不支持保存到图床根目录".to_string()));
        }

        let mut body = json!({ "url": request.url, "type": OSS_TYPE });
        if let Some(name) = &request.file_name {
            body["fileName"] = json!(name);
        }
        if let Some(dir) = &request.business_dir_id {
            body["businessDirID"] = json!(dir);
        }
        if let Some(callback) = &request.callback_url {
            body["callBackUrl"] = json!(callback);
        }
        let data: TaskIdData = self
            .client
            .call(ApiRequest::post("/api/v1/oss/offline/download", body))
            .await?;
        Ok(data.task_id)
    }

    /// 离线迁移进度
    pub async fn offline_process(&self, task_id: &str) -> PanResult<OfflineProgress> {
        self.client
            .call(ApiRequest::get("/api/v1/oss/offline/download/process").query("taskID", task_id))
            .await
    }
}
