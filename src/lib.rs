// 123 Pan Rust Library
// 123 云盘开放平台 Rust 客户端核心库

// 认证模块
pub mod auth;

// 配置管理模块
pub mod config;

// 错误类型
pub mod error;

// 日志系统
pub mod logging;

// 网盘API模块
pub mod netdisk;

// 远程目录树（路径解析、分页列表、遍历、快照）
pub mod remote;

// 下载引擎模块
pub mod downloader;

// 上传引擎模块
pub mod uploader;

// JSON 快照持久化
pub mod persistence;

// 公共模块（批量结果汇总、有界并发）
pub mod common;

// 高层入口
pub mod pan;

#[cfg(test)]
pub(crate) mod testing;

// 导出常用类型
pub use auth::{Credentials, TokenProvider};
pub use common::{BatchReport, ItemReport};
pub use config::AppConfig;
pub use downloader::{DownloadEngine, DownloadOptions, DownloadStatus};
pub use error::{PanError, PanResult};
pub use netdisk::{ApiTransport, DuplicatePolicy, FileInfo, HttpTransport, Pan123Client};
pub use pan::{DownloadResult, Pan123};
pub use remote::{PathResolution, RemoteEntry, RetryPolicy, WalkOutcome};
pub use uploader::{
    ImageUploadOutcome, RapidExport, RapidImportReport, RapidPayload, UploadMethod, UploadOutcome,
};
