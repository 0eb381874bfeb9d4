// 配置管理模块

use crate::netdisk::DuplicatePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 开放平台接口配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 重试配置（分页列表、秒传等所有重试共用）
    #[serde(default)]
    pub retry: RetryConfig,
    /// 远程目录遍历配置
    #[serde(default)]
    pub walk: WalkConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 开放平台接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 接口根地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// list v2 接口限速（次/秒，0 表示不限速）
    #[serde(default = "default_list_rate")]
    pub list_rate_per_sec: u32,
    /// list v1 接口限速（次/秒）
    #[serde(default = "default_list_v1_rate")]
    pub list_v1_rate_per_sec: u32,
    /// 创建文件接口限速（次/秒）
    #[serde(default = "default_create_rate")]
    pub create_rate_per_sec: u32,
}

fn default_base_url() -> String {
    "https://open-api.123pan.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_list_rate() -> u32 {
    15
}

fn default_list_v1_rate() -> u32 {
    1
}

fn default_create_rate() -> u32 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            list_rate_per_sec: default_list_rate(),
            list_v1_rate_per_sec: default_list_v1_rate(),
            create_rate_per_sec: default_create_rate(),
        }
    }
}

/// 重试配置
///
/// 延迟序列：base * 2^n，上限 max_delay_ms；限流时至少 0.9s + 2s * n
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 单页最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    20
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// 远程目录遍历配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// 最大递归深度
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// 并发遍历 worker 数（<=1 时串行深度优先）
    #[serde(default = "default_walk_workers")]
    pub workers: usize,
    /// 每页条目数（1-100）
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

fn default_max_depth() -> usize {
    1000
}

fn default_walk_workers() -> usize {
    5
}

fn default_page_limit() -> u32 {
    100
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            workers: default_walk_workers(),
            page_limit: default_page_limit(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 达到该大小（MB）的文件使用分片上传
    #[serde(default = "default_chunk_threshold_mb")]
    pub chunk_threshold_mb: u64,
    /// 单步上传大小上限（MB，接口限制 1GB）
    #[serde(default = "default_single_limit_mb")]
    pub single_limit_mb: u64,
    /// 文件夹上传时同时上传的文件数
    #[serde(default = "default_upload_workers")]
    pub workers: usize,
    /// 单个文件同时上传的分片数
    #[serde(default = "default_slice_workers")]
    pub slice_workers: usize,
    /// 单个分片的最大尝试次数
    #[serde(default = "default_slice_attempts")]
    pub slice_attempts: u32,
    /// 重名策略
    #[serde(default)]
    pub duplicate: DuplicatePolicy,
    /// 上传完成确认轮询超时（秒）
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    /// 上传完成确认轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_chunk_threshold_mb() -> u64 {
    10
}

fn default_single_limit_mb() -> u64 {
    1024
}

fn default_upload_workers() -> usize {
    4
}

fn default_slice_workers() -> usize {
    1
}

fn default_slice_attempts() -> u32 {
    3
}

fn default_completion_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_mb: default_chunk_threshold_mb(),
            single_limit_mb: default_single_limit_mb(),
            workers: default_upload_workers(),
            slice_workers: default_slice_workers(),
            slice_attempts: default_slice_attempts(),
            duplicate: DuplicatePolicy::default(),
            completion_timeout_secs: default_completion_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl UploadConfig {
    pub fn chunk_threshold_bytes(&self) -> u64 {
        self.chunk_threshold_mb * 1024 * 1024
    }

    pub fn single_limit_bytes(&self) -> u64 {
        self.single_limit_mb * 1024 * 1024
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 文件夹下载时同时下载的文件数
    #[serde(default = "default_download_workers")]
    pub workers: usize,
    /// 本地已存在同名文件时是否覆盖
    #[serde(default)]
    pub overwrite: bool,
    /// 单文件下载最大尝试次数
    #[serde(default = "default_single_max_tries")]
    pub single_max_tries: u32,
    /// 单文件下载重试间隔（毫秒）
    #[serde(default = "default_single_retry_wait_ms")]
    pub single_retry_wait_ms: u64,
    /// 文件夹内每个文件的最大尝试次数
    #[serde(default = "default_bulk_max_tries")]
    pub bulk_max_tries: u32,
    /// 文件夹内文件的重试间隔（毫秒）
    #[serde(default = "default_bulk_retry_wait_ms")]
    pub bulk_retry_wait_ms: u64,
}

fn default_download_workers() -> usize {
    4
}

fn default_single_max_tries() -> u32 {
    5
}

fn default_single_retry_wait_ms() -> u64 {
    2000
}

fn default_bulk_max_tries() -> u32 {
    3
}

fn default_bulk_retry_wait_ms() -> u64 {
    1000
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_download_workers(),
            overwrite: false,
            single_max_tries: default_single_max_tries(),
            single_retry_wait_ms: default_single_retry_wait_ms(),
            bulk_max_tries: default_bulk_max_tries(),
            bulk_retry_wait_ms: default_bulk_retry_wait_ms(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }

    /// 校验数值范围
    pub fn validate(&self) -> Result<()> {
        if self.walk.page_limit == 0 || self.walk.page_limit > 100 {
            anyhow::bail!("walk.page_limit 必须在 1-100 之间: {}", self.walk.page_limit);
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts 不能为 0");
        }
        if self.upload.workers == 0 || self.upload.slice_workers == 0 {
            anyhow::bail!("upload.workers / upload.slice_workers 不能为 0");
        }
        if self.upload.single_limit_mb > 1024 {
            anyhow::bail!("upload.single_limit_mb 不能超过 1024（单步上传接口限制 1GB）");
        }
        if self.download.workers == 0 {
            anyhow::bail!("download.workers 不能为 0");
        }
        if self.download.single_max_tries == 0 || self.download.bulk_max_tries == 0 {
            anyhow::bail!("download 最大尝试次数不能为 0");
        }
        Ok(())
    }
}
