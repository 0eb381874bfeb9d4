// 离线下载接口

use crate::error::{PanError, PanResult};
use crate::netdisk::client::{validate_filename, Pan123Client};
use crate::netdisk::transport::ApiRequest;
use serde::Deserialize;
use serde_json::json;

/// 创建离线任务返回
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineTask {
    #[serde(rename = "taskID")]
    pub task_id: i64,
}

/// 离线任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineStatus {
    Running,
    Failed,
    Succeeded,
    Retrying,
    Unknown(i32),
}

impl From<i32> for OfflineStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => OfflineStatus::Running,
            1 => OfflineStatus::Failed,
            2 => OfflineStatus::Succeeded,
            3 => OfflineStatus::Retrying,
            other => OfflineStatus::Unknown(other),
        }
    }
}

/// 离线任务进度
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineProgress {
    /// 下载进度百分比
    #[serde(default)]
    pub process: f64,
    #[serde(default)]
    status: i32,
}

impl OfflineProgress {
    pub fn status(&self) -> OfflineStatus {
        OfflineStatus::from(self.status)
    }
}

/// 离线下载参数
#[derive(Debug, Clone, Default)]
pub struct OfflineRequest {
    pub url: String,
    /// 自定义文件名
    pub file_name: Option<String>,
    /// 保存目录ID，不支持根目录；None 时保存到默认目录
    pub dir_id: Option<i64>,
    /// 任务结束后的回调地址
    pub callback_url: Option<String>,
}

pub struct OfflineApi<'a> {
    client: &'a Pan123Client,
}

impl<'a> OfflineApi<'a> {
    pub(crate) fn new(client: &'a Pan123Client) -> Self {
        Self { client }
    }

    /// 创建离线下载任务
    pub async fn download(&self, request: &OfflineRequest) -> PanResult<OfflineTask> {
        if !(request.url.starts_with("http://") || request.url.starts_with("https://")) {
            return Err(PanError::Validation(format!(
                "离线下载只支持 http/https 地址: {}",
                request.url
            )));
        }
        if let Some(name) = &request.file_name {
            validate_filename(name, false)?;
        }
        if request.dir_id == Some(0) {
            return Err(PanError::Validation("离线下载不支持保存到根目录".to_string()));
        }

        let mut body = json!({ "url": request.url });
        if let Some(name) = &request.file_name {
            body["fileName"] = json!(name);
        }
        if let Some(dir_id) = request.dir_id {
            body["dirID"] = json!(dir_id);
        }
        if let Some(callback) = &request.callback_url {
            body["callBackUrl"] = json!(callback);
        }

        self.client
            .call(ApiRequest::post("/api/v1/offline/download", body))
            .await
    }

    /// 查询离线下载进度
    pub async fn process(&self, task_id: i64) -> PanResult<OfflineProgress> {
        self.client
            .call(ApiRequest::get("/api/v1/offline/download/process").query("taskID", task_id))
            .await
    }
}
