// 上传模块
//
// - engine: 单文件上传（秒传 / 单步 / 分片 + 完成确认）
// - folder: 本地文件夹扫描与批量上传
// - rapid_import: 秒传 JSON 导入导出
// - image: 图床上传

pub mod chunk;
pub mod engine;
pub mod folder;
pub mod image;
pub mod rapid_import;
pub mod rapid_upload;

pub use chunk::{Slice, SlicePlan, UploadSession, DEFAULT_SLICE_SIZE};
pub use engine::{UploadEngine, UploadMethod, UploadOptions, UploadOutcome, UploadTarget};
pub use folder::{FolderScanner, ScanOptions, ScanResult, ScannedFile};
pub use image::ImageUploadOutcome;
pub use rapid_import::{
    export_entries, BatchKey, RapidExport, RapidFileSpec, RapidImportReport, RapidImportResult,
    RapidImporter, RapidPayload,
};
pub use rapid_upload::{file_md5, md5_hex, FileHash, RapidUploadChecker};
