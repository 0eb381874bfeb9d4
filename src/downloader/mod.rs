pub mod engine;
pub mod folder;

pub use engine::{DownloadEngine, DownloadOptions, DownloadStatus};
pub use folder::local_path_for;
