// access_token 管理

use crate::auth::types::{parse_expired_at, Credentials};
use crate::error::{PanError, PanResult};
use crate::netdisk::types::{AccessTokenData, ApiEnvelope};
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 获取 token 的接口路径
pub const ACCESS_TOKEN_PATH: &str = "/api/v1/access_token";

/// token 提供者
///
/// 过期前 60 秒内自动用 clientID/clientSecret 换取新 token，并发调用只会触发一次刷新
pub struct TokenProvider {
    http: Client,
    base_url: String,
    credentials: Mutex<Credentials>,
}

impl TokenProvider {
    pub fn new(http: Client, base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: Mutex::new(credentials),
        }
    }

    /// 获取有效的 access_token
    pub async fn access_token(&self) -> PanResult<String> {
        let mut creds = self.credentials.lock().await;

        if creds.needs_refresh(Utc::now()) {
            if creds.can_refresh() {
                self.fetch_token(&mut creds).await?;
            } else if creds.access_token.is_some() {
                warn!("access_token 即将过期且未配置 clientID/clientSecret，继续使用旧 token");
            }
        }

        creds
            .access_token
            .clone()
            .ok_or_else(|| PanError::Auth("无法获取有效的 access_token".to_string()))
    }

    /// 强制刷新 access_token
    pub async fn refresh(&self) -> PanResult<String> {
        let mut creds = self.credentials.lock().await;
        self.fetch_token(&mut creds).await?;
        creds
            .access_token
            .clone()
            .ok_or_else(|| PanError::Auth("刷新后仍没有 access_token".to_string()))
    }

    async fn fetch_token(&self, creds: &mut Credentials) -> PanResult<()> {
        let (Some(client_id), Some(client_secret)) = (&creds.client_id, &creds.client_secret)
        else {
            return Err(PanError::Auth(
                "缺少 clientID 或 clientSecret，无法刷新 token".to_string(),
            ));
        };

        info!("获取 access_token: clientID={}", client_id);

        let url = format!("{}{}", self.base_url, ACCESS_TOKEN_PATH);
        let response = self
            .http
            .post(&url)
            .header("Platform", "open_platform")
            .json(&json!({
                "clientID": client_id,
                "clientSecret": client_secret,
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(PanError::Auth(format!("HTTP {}: {}", status, body)));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body)
            .map_err(|e| PanError::Auth(format!("解析 token 响应失败: {}, body={}", e, body)))?;
        if !envelope.is_success() {
            return Err(PanError::Auth(format!(
                "获取 token 失败 {}: {}",
                envelope.code, envelope.message
            )));
        }

        let data: AccessTokenData = serde_json::from_value(envelope.data)
            .map_err(|e| PanError::Auth(format!("token 响应缺少字段: {}", e)))?;
        if data.access_token.is_empty() {
            return Err(PanError::Auth("响应缺少 accessToken".to_string()));
        }

        let expires_at = parse_expired_at(&data.expired_at)?;
        info!("access_token 获取成功，过期时间: {}", expires_at);

        creds.access_token = Some(data.access_token);
        creds.expires_at = Some(expires_at);
        Ok(())
    }
}
