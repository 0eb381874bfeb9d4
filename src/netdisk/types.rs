// 开放平台接口数据类型

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 上传完成接口"文件校验中"的返回码，需要继续轮询
pub const CODE_VERIFYING: i64 = 20103;

/// 分页游标的结束标记
pub const LAST_PAGE_SENTINEL: i64 = -1;

/// 响应信封
///
/// 所有接口统一返回 `{code, message, data}`，`code != 0` 一律视为失败
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    /// 返回码（0 表示成功）
    pub code: i64,

    /// 提示信息
    #[serde(default)]
    pub message: String,

    /// 业务数据（object / array / null）
    #[serde(default)]
    pub data: Value,

    /// 链路追踪 ID
    #[serde(default, rename = "x-traceID")]
    pub trace_id: String,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// 0/1 或 true/false 都接受
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// 文件/目录信息（list v1/v2、detail、infos 共用）
///
/// v2 返回 `fileId`，v1 与 detail 返回 `fileID`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 文件ID
    #[serde(rename = "fileId", alias = "fileID")]
    pub file_id: i64,

    /// 文件名
    pub filename: String,

    /// 类型 (0=文件, 1=目录)
    #[serde(rename = "type")]
    pub file_type: i32,

    /// 文件大小（字节）
    #[serde(default)]
    pub size: u64,

    /// 文件 MD5
    #[serde(default)]
    pub etag: String,

    /// 审核状态，大于 100 为审核驳回文件
    #[serde(default)]
    pub status: i32,

    /// 父目录ID
    #[serde(default, rename = "parentFileId", alias = "parentFileID")]
    pub parent_file_id: i64,

    /// 是否在回收站
    #[serde(default, deserialize_with = "flag")]
    pub trashed: bool,
}

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.file_type == 1
    }
}

/// list v2 分页数据
#[derive(Debug, Clone, Deserialize)]
pub struct FileListV2Data {
    /// 下一页游标，-1 表示最后一页
    #[serde(rename = "lastFileId", default = "last_page")]
    pub last_file_id: i64,

    /// 本页条目
    #[serde(rename = "fileList")]
    pub file_list: Vec<FileInfo>,
}

fn last_page() -> i64 {
    LAST_PAGE_SENTINEL
}

impl FileListV2Data {
    pub fn is_last_page(&self) -> bool {
        self.last_file_id == LAST_PAGE_SENTINEL
    }
}

/// list v1 分页数据（按页码翻页）
#[derive(Debug, Clone, Deserialize)]
pub struct FileListV1Data {
    /// 目录下条目总数
    #[serde(default)]
    pub total: u64,

    #[serde(rename = "fileList")]
    pub file_list: Vec<FileInfo>,
}

/// 批量查询文件详情
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfosData {
    #[serde(rename = "fileList", default)]
    pub file_list: Vec<FileInfo>,
}

/// 创建目录返回
#[derive(Debug, Clone, Deserialize)]
pub struct MkdirData {
    #[serde(rename = "dirID")]
    pub dir_id: i64,
}

/// 重名策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// 保留两者，新文件名自动添加后缀
    #[default]
    KeepBoth,
    /// 覆盖原文件
    Overwrite,
}

impl DuplicatePolicy {
    /// 接口参数值
    pub fn code(self) -> u8 {
        match self {
            DuplicatePolicy::KeepBoth => 1,
            DuplicatePolicy::Overwrite => 2,
        }
    }
}

/// 创建上传任务请求
#[derive(Debug, Clone, Serialize)]
pub struct CreateFileRequest {
    #[serde(rename = "parentFileID")]
    pub parent_file_id: i64,
    /// 文件名；contain_dir 为 true 时可以是带目录的相对路径
    pub filename: String,
    pub etag: String,
    pub size: u64,
    /// 1 保留两者，2 覆盖
    pub duplicate: u8,
    #[serde(rename = "containDir")]
    pub contain_dir: bool,
}

/// 创建上传任务返回
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateFileData {
    /// 秒传成功时的文件ID
    #[serde(rename = "fileID", default)]
    pub file_id: i64,

    /// 预上传ID（非秒传时返回）
    #[serde(rename = "preuploadID", default)]
    pub preupload_id: String,

    /// 是否秒传
    #[serde(default)]
    pub reuse: bool,

    /// 分片大小
    #[serde(rename = "sliceSize", default)]
    pub slice_size: u64,

    /// 上传地址
    #[serde(default)]
    pub servers: Vec<String>,
}

impl CreateFileData {
    /// 秒传成功：reuse=true 且返回了非零文件ID
    pub fn is_instant(&self) -> bool {
        self.reuse && self.file_id != 0
    }
}

/// 上传完成接口返回
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadCompleteData {
    #[serde(default)]
    pub completed: bool,

    #[serde(rename = "fileID", default)]
    pub file_id: i64,
}

/// 上传完成接口的三种状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// 服务端仍在校验（code 20103）
    Verifying,
    /// 已返回，但尚未给出文件ID
    Pending,
    /// 上传完成
    Completed { file_id: i64 },
}

/// 单步上传返回
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SingleUploadData {
    #[serde(rename = "fileID", default)]
    pub file_id: i64,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub reuse: bool,
}

/// 下载信息
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadInfoData {
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

/// 获取 access_token 返回
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenData {
    #[serde(rename = "accessToken")]
    pub access_token: String,

    /// 过期时间（RFC 3339）
    #[serde(rename = "expiredAt")]
    pub expired_at: String,
}

/// VIP 信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VipInfo {
    #[serde(rename = "vipLevel", default)]
    pub vip_level: i32,
    #[serde(rename = "vipLabel", default)]
    pub vip_label: String,
    #[serde(rename = "startTime", default)]
    pub start_time: String,
    #[serde(rename = "endTime", default)]
    pub end_time: String,
}

/// 用户信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub nickname: String,
    /// 已用空间（字节）
    #[serde(rename = "spaceUsed", default)]
    pub space_used: u64,
    /// 永久空间（字节）
    #[serde(rename = "spacePermanent", default)]
    pub space_permanent: u64,
    #[serde(default)]
    pub vip: bool,
    #[serde(rename = "vipInfo", default)]
    pub vip_info: Option<Vec<VipInfo>>,
}

impl UserInfo {
    /// 最高的 VIP 等级（无 VIP 返回 None）
    pub fn vip_level(&self) -> Option<i32> {
        self.vip_info
            .as_ref()
            .and_then(|list| list.iter().map(|v| v.vip_level).max())
    }
}
