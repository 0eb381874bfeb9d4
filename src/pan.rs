// 高层入口
//
// Pan123 把客户端、配置和中断令牌组合在一起，按路径提供解析、遍历、上传、下载等操作。
// 每个操作都独立构造所需组件，不共享可变缓存

use crate::auth::{Credentials, TokenProvider};
use crate::common::BatchReport;
use crate::config::AppConfig;
use crate::downloader::{DownloadEngine, DownloadOptions, DownloadStatus};
use crate::error::{PanError, PanResult};
use crate::netdisk::{HttpTransport, Pan123Client};
use crate::remote::snapshot::{snapshot_tree, SnapshotReport};
use crate::remote::{
    normalize_remote_path, DirectoryEnsurer, PagedLister, PathResolution, PathResolver, RetryPolicy,
    TreeWalker, WalkOptions, WalkOutcome,
};
use crate::uploader::{
    export_entries, ImageUploadOutcome, RapidExport, RapidImportReport, RapidImporter, RapidPayload, ScanOptions,
    UploadEngine, UploadOptions, UploadOutcome, UploadTarget,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 下载目标的解析结果
#[derive(Debug)]
pub enum DownloadResult {
    File(DownloadStatus),
    Directory(BatchReport<DownloadStatus>),
}

pub struct Pan123 {
    client: Pan123Client,
    config: AppConfig,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Pan123 {
    pub fn new(client: Pan123Client, config: AppConfig, cancel: CancellationToken) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self {
            client,
            config,
            policy,
            cancel,
        }
    }

    /// 使用环境变量中的凭证和 HTTP 传输层
    pub fn from_config(config: AppConfig, cancel: CancellationToken) -> PanResult<Self> {
        let credentials = Credentials::from_env()?;
        let http = HttpTransport::build_client(Duration::from_secs(config.api.timeout_secs))?;
        let tokens = Arc::new(TokenProvider::new(
            http.clone(),
            &config.api.base_url,
            credentials,
        ));
        let transport = HttpTransport::new(http, &config.api.base_url, tokens);
        let client = Pan123Client::new(Arc::new(transport), &config.api);
        Ok(Self::new(client, config, cancel))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn client(&self) -> &Pan123Client {
        &self.client
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn lister(&self) -> PagedLister {
        PagedLister::new(self.client.clone(), self.policy.clone(), self.cancel.clone())
    }

    fn walk_options(&self) -> WalkOptions {
        WalkOptions::from_config(&self.config.walk)
    }

    fn resolver(&self) -> PathResolver {
        PathResolver::new(self.lister(), self.walk_options().list)
    }

    fn walker(&self) -> TreeWalker {
        TreeWalker::new(self.lister(), self.walk_options())
    }

    fn upload_engine(&self) -> UploadEngine {
        UploadEngine::new(
            self.client.clone(),
            UploadOptions::from_config(&self.config.upload),
            self.policy.clone(),
            self.cancel.clone(),
        )
    }

    fn download_engine(&self) -> DownloadEngine {
        DownloadEngine::new(self.client.clone(), self.cancel.clone())
    }

    /// 解析路径
    pub async fn resolve(&self, path: &str, expect_directory: bool) -> PanResult<PathResolution> {
        self.resolver().resolve(path, expect_directory).await
    }

    /// 解析目录，不存在时返回 NotFound 错误
    async fn require_directory(&self, path: &str) -> PanResult<(i64, String)> {
        let path = normalize_remote_path(path)?;
        match self.resolve(&path, true).await? {
            PathResolution::Found { id, .. } => Ok((id, path)),
            PathResolution::NotFound => Err(PanError::NotFound(path)),
        }
    }

    /// 深度优先列出子树（目录下所有条目，不含目录本身）
    pub async fn list_tree(&self, root_path: &str) -> PanResult<WalkOutcome> {
        let (id, path) = self.require_directory(root_path).await?;
        self.walker().walk(id, &path).await
    }

    /// 确保远程目录存在，返回目录ID
    pub async fn ensure_directory(&self, path: &str) -> PanResult<i64> {
        DirectoryEnsurer::new(self.lister(), self.walk_options().list)
            .ensure_directory(path)
            .await
    }

    /// 上传单个文件到远程目录（目录不存在时创建）
    pub async fn upload_file(&self, local_path: &Path, remote_dir: &str) -> PanResult<UploadOutcome> {
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PanError::Validation(format!("无效的本地文件路径: {}", local_path.display()))
            })?;
        if !local_path.is_file() {
            return Err(PanError::Validation(format!(
                "本地文件不存在: {}",
                local_path.display()
            )));
        }

        let parent_id = self.ensure_directory(remote_dir).await?;
        self.upload_engine()
            .upload_file(local_path, &UploadTarget::file(parent_id, filename))
            .await
    }

    /// 上传图片到图床，`parent_id` 为图床目录ID（根目录为空字符串）
    ///
    /// 图床不能按名称列目录，所以不做同名检查
    pub async fn upload_image(&self, local_path: &Path, parent_id: &str) -> PanResult<ImageUploadOutcome> {
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PanError::Validation(format!("无效的本地文件路径: {}", local_path.display()))
            })?;
        if !local_path.is_file() {
            return Err(PanError::Validation(format!(
                "本地文件不存在: {}",
                local_path.display()
            )));
        }
        self.upload_engine()
            .upload_image(local_path, parent_id, &filename)
            .await
    }

    /// 上传本地文件夹到远程目录下
    pub async fn upload_directory(
        &self,
        local_dir: &Path,
        remote_dir: &str,
    ) -> PanResult<BatchReport<UploadOutcome>> {
        if !local_dir.is_dir() {
            return Err(PanError::Validation(format!(
                "本地文件夹不存在: {}",
                local_dir.display()
            )));
        }
        let parent_id = self.ensure_directory(remote_dir).await?;
        self.upload_engine()
            .upload_directory(
                local_dir,
                parent_id,
                ScanOptions::default(),
                self.config.upload.workers,
            )
            .await
    }

    /// 下载远程路径：先按目录解析，再按文件解析
    pub async fn download(
        &self,
        remote_path: &str,
        local_dir: &Path,
        overwrite: bool,
    ) -> PanResult<DownloadResult> {
        let path = normalize_remote_path(remote_path)?;
        if path == "/" {
            return Err(PanError::Validation("不支持下载整个根目录".to_string()));
        }

        if let PathResolution::Found { id, .. } = self.resolve(&path, true).await? {
            info!("下载目录: {} (ID={})", path, id);
            return self
                .download_resolved_directory(id, &path, local_dir, overwrite)
                .await
                .map(DownloadResult::Directory);
        }
        self.download_file(&path, local_dir, overwrite)
            .await
            .map(DownloadResult::File)
    }

    /// 下载单个文件到 `local_dir/文件名`
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_dir: &Path,
        overwrite: bool,
    ) -> PanResult<DownloadStatus> {
        let path = normalize_remote_path(remote_path)?;
        let entry = self
            .resolve(&path, false)
            .await?
            .into_entry()
            .ok_or_else(|| PanError::NotFound(path.clone()))?;

        let options = DownloadOptions::single_file(&self.config.download).with_overwrite(overwrite);
        self.download_engine()
            .download_entry(&entry, &local_dir.join(&entry.name), &options)
            .await
    }

    /// 下载整个目录到 `local_dir/目录名/`
    pub async fn download_directory(
        &self,
        remote_path: &str,
        local_dir: &Path,
        overwrite: bool,
    ) -> PanResult<BatchReport<DownloadStatus>> {
        let (id, path) = self.require_directory(remote_path).await?;
        self.download_resolved_directory(id, &path, local_dir, overwrite)
            .await
    }

    async fn download_resolved_directory(
        &self,
        id: i64,
        path: &str,
        local_dir: &Path,
        overwrite: bool,
    ) -> PanResult<BatchReport<DownloadStatus>> {
        let options = DownloadOptions::bulk(&self.config.download).with_overwrite(overwrite);
        self.download_engine()
            .download_directory(
                &self.walker(),
                id,
                path,
                local_dir,
                &options,
                self.config.download.workers,
            )
            .await
    }

    /// 秒传导入
    pub async fn rapid_import(
        &self,
        payload: RapidPayload,
        current_dir: &str,
    ) -> PanResult<RapidImportReport> {
        RapidImporter::new(
            self.client.clone(),
            self.config.upload.duplicate,
            self.cancel.clone(),
        )
        .import(payload, current_dir)
        .await
    }

    /// 导出子树中所有文件的秒传信息
    pub async fn rapid_export(&self, remote_path: &str) -> PanResult<RapidExport> {
        let (id, path) = self.require_directory(remote_path).await?;
        let outcome = self.walker().walk_concurrent(id, &path).await?;
        if !outcome.is_complete() {
            warn!(
                "导出不完整: {} 个目录未能遍历",
                outcome.failures.len()
            );
        }
        Ok(export_entries(&outcome.entries))
    }

    /// 保存目录列表快照
    pub async fn snapshot_tree(&self, remote_path: &str, out_dir: &Path) -> PanResult<SnapshotReport> {
        let (id, path) = self.require_directory(remote_path).await?;
        snapshot_tree(&self.walker(), id, &path, out_dir).await
    }
}
