// 分享链接接口

use crate::error::{PanError, PanResult};
use crate::netdisk::client::{validate_file_ids, Pan123Client, MAX_BATCH_IDS, MAX_PAGE_LIMIT};
use crate::netdisk::transport::ApiRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// 分享名称最大长度
const MAX_SHARE_NAME_CHARS: usize = 35;

/// 有效期可选天数（0 表示永久）
const SHARE_EXPIRE_DAYS: [u32; 4] = [0, 1, 7, 30];

/// 分享提取流量包开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficSwitch {
    /// 全部关闭
    #[default]
    Off,
    /// 打开游客免登录提取
    Guest,
    /// 打开超流量用户提取
    OverQuota,
    /// 全部开启
    All,
}

impl TrafficSwitch {
    fn code(self) -> u8 {
        match self {
            TrafficSwitch::Off => 1,
            TrafficSwitch::Guest => 2,
            TrafficSwitch::OverQuota => 3,
            TrafficSwitch::All => 4,
        }
    }
}

/// 流量包设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSettings {
    pub switch: TrafficSwitch,
    /// 限制的流量（字节），None 表示不限制
    pub limit: Option<u64>,
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            switch: TrafficSwitch::Off,
            limit: None,
        }
    }
}

impl TrafficSettings {
    fn apply(&self, body: &mut serde_json::Value) {
        body["trafficSwitch"] = json!(self.switch.code());
        match self.limit {
            Some(limit) => {
                body["trafficLimitSwitch"] = json!(2);
                body["trafficLimit"] = json!(limit);
            }
            None => body["trafficLimitSwitch"] = json!(1),
        }
    }
}

/// 创建免费分享
#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub name: String,
    /// 有效期天数：0/1/7/30
    pub expire_days: u32,
    pub file_ids: Vec<i64>,
    /// 提取码
    pub password: Option<String>,
    pub traffic: TrafficSettings,
}

/// 创建付费分享
#[derive(Debug, Clone)]
pub struct PaidShareRequest {
    pub name: String,
    pub file_ids: Vec<i64>,
    /// 金额（1-99 元）
    pub pay_amount: u32,
    /// 是否开启打赏
    pub is_reward: bool,
    pub description: Option<String>,
}

/// 创建分享返回
#[derive(Debug, Clone, Deserialize)]
pub struct ShareCreated {
    #[serde(rename = "shareID")]
    pub share_id: i64,
    #[serde(rename = "shareKey")]
    pub share_key: String,
}

impl ShareCreated {
    pub fn url(&self) -> String {
        format!("https://www.123pan.com/s/{}", self.share_key)
    }
}

/// 分享列表条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInfo {
    #[serde(rename = "shareId")]
    pub share_id: i64,
    #[serde(rename = "shareKey", default)]
    pub share_key: String,
    #[serde(rename = "shareName", default)]
    pub share_name: String,
    #[serde(default)]
    pub expiration: String,
    #[serde(default)]
    pub expired: i32,
    #[serde(rename = "sharePwd", default)]
    pub share_pwd: String,
    #[serde(rename = "trafficSwitch", default)]
    pub traffic_switch: i32,
    #[serde(rename = "trafficLimit", default)]
    pub traffic_limit: u64,
    #[serde(rename = "payAmount", default)]
    pub pay_amount: Option<u32>,
}

/// 分享列表分页数据
#[derive(Debug, Clone, Deserialize)]
pub struct ShareListData {
    /// -1 表示最后一页
    #[serde(rename = "lastShareId")]
    pub last_share_id: i64,
    #[serde(rename = "shareList", default)]
    pub share_list: Vec<ShareInfo>,
}

/// 分享接口
pub struct ShareApi<'a> {
    client: &'a Pan123Client,
}

impl<'a> ShareApi<'a> {
    pub(crate) fn new(client: &'a Pan123Client) -> Self {
        Self { client }
    }

    /// 创建免费分享链接
    pub async fn create(&self, request: &ShareRequest) -> PanResult<ShareCreated> {
        validate_share_name(&request.name)?;
        if !SHARE_EXPIRE_DAYS.contains(&request.expire_days) {
            return Err(PanError::Validation(format!(
                "有效期只能是 0/1/7/30 天: {}",
                request.expire_days
            )));
        }
        validate_file_ids(&request.file_ids, MAX_BATCH_IDS)?;

        let mut body = json!({
            "shareName": request.name,
            "shareExpire": request.expire_days,
            "fileIDList": join_ids(&request.file_ids),
        });
        if let Some(pwd) = &request.password {
            body["sharePwd"] = json!(pwd);
        }
        request.traffic.apply(&mut body);

        self.client
            .call(ApiRequest::post("/api/v1/share/create", body))
            .await
    }

    /// 获取分享列表
    pub async fn list(&self, limit: u32, last_share_id: Option<i64>) -> PanResult<ShareListData> {
        validate_limit(limit)?;
        self.client
            .call(
                ApiRequest::get("/api/v1/share/list")
                    .query("limit", limit)
                    .query_opt("lastShareId", last_share_id),
            )
            .await
    }

    /// 修改分享链接的流量包设置
    pub async fn update(&self, share_ids: &[i64], traffic: TrafficSettings) -> PanResult<()> {
        validate_file_ids(share_ids, MAX_BATCH_IDS)?;
        let mut body = json!({ "shareIdList": share_ids });
        traffic.apply(&mut body);
        self.client
            .call_unit(ApiRequest::put("/api/v1/share/list/info", body))
            .await
    }

    /// 创建付费分享链接
    pub async fn create_paid(&self, request: &PaidShareRequest) -> PanResult<ShareCreated> {
        validate_share_name(&request.name)?;
        validate_file_ids(&request.file_ids, MAX_BATCH_IDS)?;
        if !(1..=99).contains(&request.pay_amount) {
            return Err(PanError::Validation(format!(
                "付费金额必须在 1-99 之间: {}",
                request.pay_amount
            )));
        }

        let mut body = json!({
            "shareName": request.name,
            "fileIDList": join_ids(&request.file_ids),
            "payAmount": request.pay_amount,
            "isReward": if request.is_reward { 1 } else { 0 },
        });
        if let Some(desc) = &request.description {
            body["resourceDesc"] = json!(desc);
        }

        self.client
            .call(ApiRequest::post("/api/v1/share/content-payment/create", body))
            .await
    }

    /// 获取付费分享列表
    pub async fn list_paid(
        &self,
        limit: u32,
        last_share_id: Option<i64>,
    ) -> PanResult<ShareListData> {
        validate_limit(limit)?;
        self.client
            .call(
                ApiRequest::get("/api/v1/share/payment/list")
                    .query("limit", limit)
                    .query_opt("lastShareId", last_share_id),
            )
            .await
    }

    /// 修改付费分享链接
    pub async fn update_paid(&self, share_ids: &[i64], traffic: TrafficSettings) -> PanResult<()> {
        validate_file_ids(share_ids, MAX_BATCH_IDS)?;
        let mut body = json!({ "shareIdList": share_ids });
        traffic.apply(&mut body);
        self.client
            .call_unit(ApiRequest::put("/api/v1/share/list/payment/info", body))
            .await
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn validate_share_name(name: &str) -> PanResult<()> {
    if name.trim().is_empty() || name.chars().count() >= MAX_SHARE_NAME_CHARS {
        return Err(PanError::Validation(format!(
            "分享名称不能为空且要小于 {} 个字符: {:?}",
            MAX_SHARE_NAME_CHARS, name
        )));
    }
    Ok(())
}

fn validate_limit(limit: u32) -> PanResult<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(PanError::Validation(format!(
            "limit 必须在 1-{} 之间: {}",
            MAX_PAGE_LIMIT, limit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDrive;

    fn request(expire_days: u32, count: i64) -> ShareRequest {
        ShareRequest {
            name: "资料".to_string(),
            expire_days,
            file_ids: (1..=count).collect(),
            password: Some("abcd".to_string()),
            traffic: TrafficSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_share_parameter_limits() {
        let drive = FakeDrive::new();
        let client = drive.client();
        let share = client.share();

        assert!(matches!(
            share.create(&request(3, 1)).await,
            Err(PanError::Validation(_))
        ));
        assert!(matches!(
            share.create(&request(7, 101)).await,
            Err(PanError::Validation(_))
        ));
        assert!(matches!(
            share.list(0, None).await,
            Err(PanError::Validation(_))
        ));

        let paid = PaidShareRequest {
            name: "课程".to_string(),
            file_ids: vec![1],
            pay_amount: 100,
            is_reward: false,
            description: None,
        };
        assert!(matches!(
            share.create_paid(&paid).await,
            Err(PanError::Validation(_))
        ));

        assert_eq!(drive.call_count(), 0);
    }

    #[test]
    fn test_traffic_settings_body() {
        let mut body = json!({});
        TrafficSettings {
            switch: TrafficSwitch::All,
            limit: Some(1024),
        }
        .apply(&mut body);
        assert_eq!(body["trafficSwitch"], 4);
        assert_eq!(body["trafficLimitSwitch"], 2);
        assert_eq!(body["trafficLimit"], 1024);

        assert_eq!(join_ids(&[1, 2, 3]), "1,2,3");
    }
}
