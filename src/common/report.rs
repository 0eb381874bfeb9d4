// 批量操作结果汇总

use crate::error::{PanError, PanResult};
use serde::Serialize;

/// 单项结果
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport<T> {
    /// 本地路径或远程路径
    pub name: String,
    pub outcome: Result<T, String>,
}

impl<T> ItemReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// 批量结果（按文件统计，不会用一个布尔值代表整个目录）
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<T> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<ItemReport<T>>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            items: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一项结果；用户中断不计入失败，直接返回给调用方
    pub fn record(&mut self, name: impl Into<String>, result: PanResult<T>) -> PanResult<()> {
        let outcome = match result {
            Err(e) if e.is_interrupt() => return Err(e),
            Err(e) => Err(e.to_string()),
            Ok(value) => Ok(value),
        };
        self.push(ItemReport {
            name: name.into(),
            outcome,
        });
        Ok(())
    }

    /// 记录一项在执行前就已失败的条目（如遍历时放弃的分支）
    pub fn record_failure(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.push(ItemReport {
            name: name.into(),
            outcome: Err(reason.into()),
        });
    }

    fn push(&mut self, item: ItemReport<T>) {
        self.total += 1;
        if item.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(item);
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            Err(reason) => Some((item.name.as_str(), reason.as_str())),
            Ok(_) => None,
        })
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            Ok(value) => Some((item.name.as_str(), value)),
            Err(_) => None,
        })
    }

    /// 失败项转成错误（全部成功时返回 Ok）
    pub fn into_result(self) -> PanResult<Self> {
        if self.failed == 0 {
            return Ok(self);
        }
        Err(PanError::TransferFailed(format!(
            "{}/{} 项失败",
            self.failed, self.total
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts() {
        let mut report: BatchReport<u64> = BatchReport::new();
        report.record("a", Ok(1)).unwrap();
        report
            .record("b", Err(PanError::TransferFailed("boom".into())))
            .unwrap();
        report.record_failure("c", "分支放弃");

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.successes().next(), Some(("a", &1)));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_interrupt_is_not_absorbed() {
        let mut report: BatchReport<()> = BatchReport::new();
        let err = report.record("x", Err(PanError::Interrupted)).unwrap_err();
        assert!(err.is_interrupt());
        assert_eq!(report.total, 0);
    }
}
