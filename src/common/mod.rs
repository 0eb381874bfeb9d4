//! 公共模块
//!
//! 批量操作共用的结果汇总与有界并发执行

mod pool;
mod report;

pub use pool::run_bounded;
pub use report::{BatchReport, ItemReport};

/// 字节数格式化为可读字符串
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
