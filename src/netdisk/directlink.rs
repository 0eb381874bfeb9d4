// 直链空间接口

use crate::error::{PanError, PanResult};
use crate::netdisk::client::Pan123Client;
use crate::netdisk::transport::ApiRequest;
use serde::Deserialize;
use serde_json::{json, Value};

/// IP 黑名单最多条数
const MAX_BLACKLIST_IPS: usize = 500;

/// 直链访问日志分页查询
#[derive(Debug, Clone, Copy)]
pub struct LogQuery {
    pub page: u32,
    pub page_size: u32,
    /// 起止时间：流量日志为 Unix 秒，离线日志为小时 `YYYYMMDDHH`
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectLinkUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnableResult {
    /// 成功开启直链空间的目录名
    #[serde(default)]
    pub filename: String,
}

/// 日志分页结果（条目结构随接口变化，保留原始 JSON）
#[derive(Debug, Clone, Deserialize)]
pub struct LogPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub list: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpBlacklist {
    #[serde(rename = "ipList", default)]
    pub ip_list: Vec<String>,
    /// 1 启用，2 禁用
    #[serde(default)]
    pub status: i32,
}

pub struct DirectLinkApi<'a> {
    client: &'a Pan123Client,
}

impl<'a> DirectLinkApi<'a> {
    pub(crate) fn new(client: &'a Pan123Client) -> Self {
        Self { client }
    }

    /// 启用直链空间（目录）
    pub async fn enable(&self, file_id: i64) -> PanResult<EnableResult> {
        self.client
            .call(ApiRequest::post(
                "/api/v1/direct-link/enable",
                json!({ "fileID": file_id }),
            ))
            .await
    }

    /// 获取文件直链
    pub async fn url(&self, file_id: i64) -> PanResult<String> {
        let data: DirectLinkUrl = self
            .client
            .call(ApiRequest::get("/api/v1/direct-link/url").query("fileID", file_id))
            .await?;
        Ok(data.url)
    }

    /// 禁用直链空间
    pub async fn disable(&self, file_id: i64) -> PanResult<()> {
        self.client
            .call_unit(ApiRequest::post(
                "/api/v1/direct-link/disable",
                json!({ "fileID": file_id }),
            ))
            .await
    }

    /// 刷新直链缓存
    pub async fn refresh_cache(&self) -> PanResult<()> {
        self.client
            .call_unit(ApiRequest::post("/api/v1/direct-link/cache/refresh", json!({})))
            .await
    }

    /// 直链流量日志
    pub async fn traffic_log(&self, query: LogQuery) -> PanResult<LogPage> {
        validate_query(&query)?;
        self.client
            .call(
                ApiRequest::get("/api/v1/direct-link/log")
                    .query("pageNum", query.page)
                    .query("pageSize", query.page_size)
                    .query("startTime", query.start)
                    .query("endTime", query.end),
            )
            .await
    }

    /// 直链离线日志（按小时）
    pub async fn log(&self, query: LogQuery) -> PanResult<LogPage> {
        validate_query(&query)?;
        self.client
            .call(
                ApiRequest::get("/api/v1/direct-link/offline/logs")
                    .query("pageNum", query.page)
                    .query("pageSize", query.page_size)
                    .query("startHour", query.start)
                    .query("endHour", query.end),
            )
            .await
    }

    /// 开关 IP 黑名单
    pub async fn ip_blacklist_switch(&self, enabled: bool) -> PanResult<()> {
        self.client
            .call_unit(ApiRequest::post(
                "/api/v1/developer/config/forbide-ip/switch",
                json!({ "Status": if enabled { 1 } else { 2 } }),
            ))
            .await
    }

    /// 覆盖更新 IP 黑名单
    pub async fn ip_blacklist_update(&self, ips: &[String]) -> PanResult<()> {
        if ips.len() > MAX_BLACKLIST_IPS {
            return Err(PanError::Validation(format!(
                "IP 黑名单最多 {} 条，当前 {} 条",
                MAX_BLACKLIST_IPS,
                ips.len()
            )));
        }
        if let Some(bad) = ips.iter().find(|ip| ip.parse::<std::net::IpAddr>().is_err()) {
            return Err(PanError::Validation(format!("无效的 IP 地址: {}", bad)));
        }
        self.client
            .call_unit(ApiRequest::post(
                "/api/v1/developer/config/forbide-ip/update",
                json!({ "IpList": ips }),
            ))
            .await
    }

    /// 查询 IP 黑名单
    pub async fn ip_blacklist_list(&self) -> PanResult<IpBlacklist> {
        self.client
            .call(ApiRequest::get("/api/v1/developer/config/forbide-ip/list"))
            .await
    }
}

fn validate_query(query: &LogQuery) -> PanResult<()> {
    if query.page == 0 || query.page_size == 0 || query.page_size > 100 {
        return Err(PanError::Validation(format!(
            "分页参数无效: page={}, page_size={}",
            query.page, query.page_size
        )));
    }
    if query.start > query.end {
        return Err(PanError::Validation(format!(
            "开始时间晚于结束时间: {} > {}",
            query.start, query.end
        )));
    }
    Ok(())
}
