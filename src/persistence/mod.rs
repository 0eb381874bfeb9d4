//! JSON 文件持久化
//!
//! 先写 `*.tmp` 再原子重命名，中断时不会留下半个文件。
//! 文件名超过 150 字节时截断主干并追加 SHA1 摘要，保证在常见文件系统上可创建

use crate::error::PanResult;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 文件名最大字节数
pub const MAX_FILE_NAME_BYTES: usize = 150;

/// 截断后主干至少保留的字节数
const MIN_STEM_BYTES: usize = 12;

/// 摘要长度（十六进制字符）
const DIGEST_CHARS: usize = 8;

/// 原子写入 JSON，返回实际写入的路径（文件名可能被缩短）
pub fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> PanResult<PathBuf> {
    let path = safe_path(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, &path)?;
    debug!("已保存 JSON: {:?}", path);

    Ok(path)
}

/// 读取 JSON 文件
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> PanResult<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// 缩短路径中过长的文件名
pub fn safe_path(path: &Path) -> PathBuf {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };
    let (short, changed) = shrink_file_name(name, MAX_FILE_NAME_BYTES);
    if changed {
        debug!("文件名过长，已缩短: {} -> {}", name, short);
        path.with_file_name(short)
    } else {
        path.to_path_buf()
    }
}

/// 缩短文件名：`{截断的主干}_{sha1 前 8 位}{扩展名}`
///
/// 返回 (新文件名, 是否改变)；不会在 UTF-8 字符中间截断
pub fn shrink_file_name(name: &str, max_bytes: usize) -> (String, bool) {
    if name.len() <= max_bytes {
        return (name.to_string(), false);
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };

    let reserve = ext.len() + DIGEST_CHARS + 1;
    let remain = max_bytes.saturating_sub(reserve).max(MIN_STEM_BYTES);

    let mut cut = remain.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    let digest = hex::encode(Sha1::digest(name.as_bytes()));
    (
        format!("{}_{}{}", &stem[..cut], &digest[..DIGEST_CHARS], ext),
        true,
    )
}

/// 把任意字符串转成可用作文件名的片段
///
/// 路径分隔符和控制字符替换为 `_`，按字符数截断
pub fn sanitize_component(raw: &str, max_chars: usize) -> String {
    let cleaned: String = raw
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(max_chars)
        .collect();
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_short_name_unchanged() {
        assert_eq!(
            shrink_file_name("a.json", MAX_FILE_NAME_BYTES),
            ("a.json".to_string(), false)
        );
    }

    #[test]
    fn test_long_name_is_shrunk() {
        let name = format!("{}.json", "x".repeat(300));
        let (short, changed) = shrink_file_name(&name, MAX_FILE_NAME_BYTES);
        assert!(changed);
        assert!(short.len() <= MAX_FILE_NAME_BYTES);
        assert!(short.ends_with(".json"));
        // 主干 150 - (5 + 8 + 1) = 136 字节
        assert_eq!(short.len(), 136 + 1 + 8 + 5);
    }

    #[test]
    fn test_save_json_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/out.json");

        let written = save_json_atomic(&path, &json!({"k": [1, 2, 3]})).unwrap();
        assert_eq!(written, path);

        let loaded: serde_json::Value = load_json(&written).unwrap();
        assert_eq!(loaded["k"][2], 3);
        // 没有残留的临时文件
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_json_with_long_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(format!("{}.json", "目录".repeat(60)));

        let written = save_json_atomic(&path, &json!({})).unwrap();
        assert_ne!(written, path);
        assert!(written.exists());
        assert!(written.file_name().unwrap().len() <= MAX_FILE_NAME_BYTES);
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("/a/b:c", 80), "a_b_c");
        assert_eq!(sanitize_component("/", 80), "root");
        assert_eq!(sanitize_component("/abcdef", 3), "abc");
    }

    proptest! {
        #[test]
        fn shrunk_names_fit_and_keep_extension(stem in "\\PC{1,120}", ext in "[a-z]{1,5}") {
            prop_assume!(!stem.contains('.'));
            let name = format!("{}.{}", stem, ext);
            let (short, changed) = shrink_file_name(&name, MAX_FILE_NAME_BYTES);

            prop_assert!(short.len() <= MAX_FILE_NAME_BYTES);
            let suffix = format!(".{}", ext);
            prop_assert!(short.ends_with(&suffix));
            prop_assert_eq!(changed, name.len() > MAX_FILE_NAME_BYTES);
            prop_assert_eq!(shrink_file_name(&name, MAX_FILE_NAME_BYTES).0, short);
        }
    }
}
