// 基于 reqwest 的传输实现

use crate::auth::TokenProvider;
use crate::error::{PanError, PanResult};
use crate::netdisk::transport::{ApiRequest, ApiTransport, HttpMethod, MultipartUpload, RawResponse};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{multipart, Client};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 开放平台要求的平台标识头
pub const PLATFORM_HEADER: (&str, &str) = ("Platform", "open_platform");

/// HTTP 传输
pub struct HttpTransport {
    client: Client,
    base_url: String,
    tokens: Arc<TokenProvider>,
}

impl HttpTransport {
    pub fn new(client: Client, base_url: &str, tokens: Arc<TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// 创建共享的 reqwest 客户端
    pub fn build_client(timeout: Duration) -> PanResult<Client> {
        Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pan123-rust/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PanError::from)
    }

    async fn bearer(&self) -> PanResult<String> {
        Ok(format!("Bearer {}", self.tokens.access_token().await?))
    }
}

async fn into_raw(response: reqwest::Response) -> PanResult<RawResponse> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(RawResponse { status, body })
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> PanResult<RawResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("{:?} {} query={:?}", request.method, url, request.query);

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
        };

        let mut builder = builder
            .header(PLATFORM_HEADER.0, PLATFORM_HEADER.1)
            .header("Authorization", self.bearer().await?)
            .query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        into_raw(builder.send().await?).await
    }

    async fn send_multipart(&self, url: &str, upload: MultipartUpload) -> PanResult<RawResponse> {
        debug!(
            "multipart 上传: {} 字段={:?} 数据={} 字节",
            url,
            upload.fields,
            upload.data.len()
        );

        let mut form = multipart::Form::new();
        for (key, value) in upload.fields {
            form = form.text(key, value);
        }
        let part = multipart::Part::bytes(upload.data).file_name(upload.file_name);
        form = form.part(upload.file_field, part);

        let response = self
            .client
            .post(url)
            .header(PLATFORM_HEADER.0, PLATFORM_HEADER.1)
            .header("Authorization", self.bearer().await?)
            .multipart(form)
            .send()
            .await?;

        into_raw(response).await
    }

    async fn put_bytes(&self, url: &str, data: Vec<u8>) -> PanResult<RawResponse> {
        debug!("PUT 分片: {} ({} 字节)", url, data.len());
        // 签名地址自带鉴权
        let response = self.client.put(url).body(data).send().await?;
        into_raw(response).await
    }

    async fn download_to(&self, url: &str, dest: &Path) -> PanResult<u64> {
        // 下载地址已签名，不需要授权头
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(if status == 429 {
                PanError::RateLimited
            } else {
                PanError::Http { status, body }
            });
        }

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}
