// 秒传哈希计算
//
// 123 云盘秒传只需要完整文件的 MD5（etag）与文件大小：
// 创建上传任务时服务端已有相同内容则直接返回 reuse=true

use crate::error::{PanError, PanResult};
use md5::Context as Md5Context;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// 读取缓冲区大小
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 秒传所需的哈希信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// 完整文件 MD5（小写十六进制）
    pub etag: String,
    pub size: u64,
}

/// 秒传检查器
pub struct RapidUploadChecker;

impl RapidUploadChecker {
    /// 计算文件 etag，空文件返回参数错误
    pub async fn calculate_hash(path: &Path) -> PanResult<FileHash> {
        let path = path.to_path_buf();

        // 在阻塞线程池中执行文件 I/O
        tokio::task::spawn_blocking(move || Self::calculate_hash_sync(&path))
            .await
            .map_err(|e| PanError::Io(std::io::Error::other(format!("计算哈希任务执行失败: {}", e))))?
    }

    fn calculate_hash_sync(path: &Path) -> PanResult<FileHash> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Err(PanError::Validation(format!(
                "不支持上传空文件: {}",
                path.display()
            )));
        }

        let etag = md5_reader(file)?;
        debug!("文件哈希: {} etag={} size={}", path.display(), etag, size);
        Ok(FileHash { etag, size })
    }
}

fn md5_reader(file: File) -> PanResult<String> {
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Md5Context::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.compute()))
}

/// 本地文件的 MD5（下载校验用，允许空文件）
pub async fn file_md5(path: &Path) -> PanResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || md5_reader(File::open(&path)?))
        .await
        .map_err(|e| PanError::Io(std::io::Error::other(format!("计算 MD5 任务执行失败: {}", e))))?
}

/// 内存数据的 MD5（分片校验用）
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
