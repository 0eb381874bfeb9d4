// 分片规划与分片上传会话

use crate::error::{PanError, PanResult};
use crate::netdisk::CreateFileData;
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// 服务端未返回 sliceSize 时使用的分片大小: 16MB
pub const DEFAULT_SLICE_SIZE: u64 = 16 * 1024 * 1024;

/// 单个分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    /// 分片序号，从 1 开始
    pub slice_no: u32,
    pub range: Range<u64>,
}

impl Slice {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 分片规划：ceil(size / slice_size) 个分片，序号在派发前确定
#[derive(Debug, Clone)]
pub struct SlicePlan {
    pub file_size: u64,
    pub slice_size: u64,
    pub slices: Vec<Slice>,
}

impl SlicePlan {
    pub fn new(file_size: u64, slice_size: u64) -> PanResult<Self> {
        if slice_size == 0 {
            return Err(PanError::Validation("分片大小不能为 0".to_string()));
        }

        let count = file_size.div_ceil(slice_size);
        let slices = (0..count)
            .map(|i| {
                let start = i * slice_size;
                Slice {
                    slice_no: (i + 1) as u32,
                    range: start..(start + slice_size).min(file_size),
                }
            })
            .collect();

        Ok(Self {
            file_size,
            slice_size,
            slices,
        })
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }
}

/// 读取一个分片的数据
pub async fn read_slice(path: &Path, slice: &Slice) -> PanResult<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(slice.range.start)).await?;

    let mut buffer = vec![0u8; slice.len() as usize];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}

/// 分片上传会话
///
/// 由创建上传任务生成，随分片完成更新进度，最后由完成接口结束
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub preupload_id: String,
    pub slice_size: u64,
    /// 选中的上传服务器
    pub upload_server: String,
    /// 每个分片的完成比例（0.0 或 1.0）
    pub progress: Vec<f32>,
}

impl UploadSession {
    /// 从创建任务的响应建立会话（取第一个上传服务器）
    pub fn from_create(data: &CreateFileData, file_size: u64) -> PanResult<(Self, SlicePlan)> {
        if data.preupload_id.is_empty() {
            return Err(PanError::Malformed("创建上传任务未返回 preuploadID".to_string()));
        }
        let upload_server = data
            .servers
            .first()
            .cloned()
            .ok_or_else(|| PanError::Malformed("创建上传任务未返回上传服务器".to_string()))?;

        let slice_size = if data.slice_size > 0 {
            data.slice_size
        } else {
            DEFAULT_SLICE_SIZE
        };
        let plan = SlicePlan::new(file_size, slice_size)?;

        Ok((
            Self {
                preupload_id: data.preupload_id.clone(),
                slice_size,
                upload_server,
                progress: vec![0.0; plan.slice_count()],
            },
            plan,
        ))
    }

    pub fn total_parts(&self) -> usize {
        self.progress.len()
    }

    pub fn mark_done(&mut self, slice_no: u32) {
        let Some(index) = (slice_no as usize).checked_sub(1) else {
            return;
        };
        if let Some(p) = self.progress.get_mut(index) {
            *p = 1.0;
        }
    }

    pub fn completed_parts(&self) -> usize {
        self.progress.iter().filter(|p| **p >= 1.0).count()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_parts() == self.total_parts()
    }
}
