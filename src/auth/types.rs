// 认证模块数据类型定义

use crate::error::{PanError, PanResult};
use chrono::{DateTime, TimeZone, Utc};

/// 环境变量：授权 token
pub const ENV_TOKEN: &str = "PAN123TOKEN";
/// 环境变量：token 过期时间（RFC 3339 或 Unix 秒）
pub const ENV_TOKEN_EXPIRED_AT: &str = "PAN123TOKEN_EXPIREDAT";
/// 环境变量：客户端 ID
pub const ENV_CLIENT_ID: &str = "PAN123CLIENTID";
/// 环境变量：客户端密钥
pub const ENV_CLIENT_SECRET: &str = "PAN123CLIENTSECRET";

/// 提前刷新的秒数
pub const REFRESH_THRESHOLD_SECS: i64 = 60;

/// 授权凭证
///
/// 只有 token 时无法自动续期；配置了 clientID/clientSecret 时过期前自动换新
#[derive(Clone, Default)]
pub struct Credentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    /// token 过期时间，None 表示未知（视为长期有效）
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credentials {
    /// 从环境变量读取
    pub fn from_env() -> PanResult<Self> {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let expires_at = match read(ENV_TOKEN_EXPIRED_AT) {
            Some(raw) => Some(parse_expired_at(&raw)?),
            None => None,
        };

        let credentials = Self {
            client_id: read(ENV_CLIENT_ID),
            client_secret: read(ENV_CLIENT_SECRET),
            access_token: read(ENV_TOKEN),
            expires_at,
        };

        if credentials.access_token.is_none() && !credentials.can_refresh() {
            return Err(PanError::Auth(format!(
                "未配置授权信息，请设置 {} 或 {}/{}",
                ENV_TOKEN, ENV_CLIENT_ID, ENV_CLIENT_SECRET
            )));
        }

        Ok(credentials)
    }

    /// 仅使用已有 token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// 使用 clientID/clientSecret（首次请求时换取 token）
    pub fn with_client(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            ..Self::default()
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    /// 是否需要换取新 token
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expires_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(_), Some(expires_at)) => {
                expires_at.timestamp() <= now.timestamp() + REFRESH_THRESHOLD_SECS
            }
        }
    }
}

/// 解析过期时间：RFC 3339（接口返回格式）或 Unix 秒（旧环境变量格式）
pub fn parse_expired_at(raw: &str) -> PanResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(dt);
        }
    }
    Err(PanError::Auth(format!("无效的过期时间格式: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_expired_at_formats() {
        let a = parse_expired_at("2025-03-01T12:00:00+08:00").unwrap();
        assert_eq!(a.timestamp(), 1740801600);

        let b = parse_expired_at("1740801600").unwrap();
        assert_eq!(a, b);

        assert!(parse_expired_at("tomorrow").is_err());
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();

        assert!(Credentials::default().needs_refresh(now));
        assert!(!Credentials::with_token("t").needs_refresh(now));

        let mut creds = Credentials::with_token("t");
        creds.expires_at = Some(now + Duration::seconds(30));
        assert!(creds.needs_refresh(now));

        creds.expires_at = Some(now + Duration::hours(2));
        assert!(!creds.needs_refresh(now));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut creds = Credentials::with_client("id", "secret");
        creds.access_token = Some("token-value".into());
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret\""));
        assert!(!printed.contains("token-value"));
        assert!(printed.contains("id"));
    }
}
