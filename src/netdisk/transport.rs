// 传输层抽象
//
// 客户端只依赖 ApiTransport，不关心底层是 reqwest 还是测试用的内存实现

use crate::error::PanResult;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// 一次开放平台接口调用
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// 接口路径，如 `/api/v2/file/list`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: &str, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.to_string(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn put(path: &str, body: Value) -> Self {
        Self {
            method: HttpMethod::Put,
            path: path.to_string(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// 可选参数，None 时不发送
    pub fn query_opt<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// 读取查询参数（测试与日志用）
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 原始 HTTP 响应
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// multipart 上传内容（分片上传与单步上传共用）
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    /// 普通表单字段
    pub fields: Vec<(String, String)>,
    /// 文件字段名（分片为 `slice`，单步上传为 `file`）
    pub file_field: String,
    pub file_name: String,
    pub data: Vec<u8>,
}

impl MultipartUpload {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 底层传输
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// 调用开放平台接口（自动携带授权头）
    async fn send(&self, request: ApiRequest) -> PanResult<RawResponse>;

    /// 向上传域名发送 multipart 请求，`url` 为完整地址
    async fn send_multipart(&self, url: &str, upload: MultipartUpload) -> PanResult<RawResponse>;

    /// 把数据 PUT 到已签名的地址（图床分片上传）
    async fn put_bytes(&self, url: &str, data: Vec<u8>) -> PanResult<RawResponse>;

    /// 下载 `url` 的内容写入 `dest`，返回写入字节数
    async fn download_to(&self, url: &str, dest: &Path) -> PanResult<u64>;
}
