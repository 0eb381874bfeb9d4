// 网盘API模块

pub mod client;
pub mod directlink;
pub mod http;
pub mod offline;
pub mod oss;
pub mod rate_limit;
pub mod share;
pub mod transport;
pub mod types;

pub use client::{Pan123Client, SearchQuery};
pub use http::HttpTransport;
pub use oss::{OssApi, OssFileInfo};
pub use rate_limit::RateLimiter;
pub use transport::{ApiRequest, ApiTransport, HttpMethod, MultipartUpload, RawResponse};
pub use types::*;
