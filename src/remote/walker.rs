// 目录树遍历
//
// - 串行模式：深度优先前序，输出顺序确定
// - 并发模式：协调者持有待处理队列，每个任务只返回自己目录的列表结果，
//   由协调者汇总并派发子目录，不共享可变计数
// 单个分支失败只记录，不影响兄弟分支；用户中断立即向上返回

use crate::config::WalkConfig;
use crate::error::PanResult;
use crate::remote::lister::{ListOptions, PagedLister};
use crate::remote::retry::check_cancelled;
use crate::remote::{normalize_remote_path, RemoteEntry};
use async_recursion::async_recursion;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// 最大深度，超过后放弃该分支
    pub max_depth: usize,
    /// 并发 worker 数
    pub workers: usize,
    pub list: ListOptions,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from_config(&WalkConfig::default())
    }
}

impl WalkOptions {
    pub fn from_config(config: &WalkConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            workers: config.workers.max(1),
            list: ListOptions::with_page_limit(config.page_limit),
        }
    }
}

/// 被放弃的分支
#[derive(Debug, Clone, Serialize)]
pub struct BranchFailure {
    pub dir_id: i64,
    pub path: String,
    pub reason: String,
}

/// 遍历结果
///
/// `failures` 非空时结果不完整，调用方需要自行判断
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalkOutcome {
    pub entries: Vec<RemoteEntry>,
    pub failures: Vec<BranchFailure>,
}

impl WalkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &RemoteEntry> {
        self.entries.iter().filter(|e| e.is_file())
    }

    pub fn directories(&self) -> impl Iterator<Item = &RemoteEntry> {
        self.entries.iter().filter(|e| e.is_dir())
    }

    fn record_failure(&mut self, dir_id: i64, path: &str, reason: String) {
        self.failures.push(BranchFailure {
            dir_id,
            path: path.to_string(),
            reason,
        });
    }
}

#[derive(Debug, Clone)]
struct DirTask {
    id: i64,
    path: String,
    depth: usize,
}

#[derive(Clone)]
pub struct TreeWalker {
    lister: PagedLister,
    options: WalkOptions,
}

impl TreeWalker {
    pub fn new(lister: PagedLister, options: WalkOptions) -> Self {
        Self { lister, options }
    }

    pub fn options(&self) -> &WalkOptions {
        &self.options
    }

    /// 串行深度优先遍历（前序）
    pub async fn walk(&self, root_id: i64, root_path: &str) -> PanResult<WalkOutcome> {
        let root_path = normalize_remote_path(root_path)?;
        let mut outcome = WalkOutcome::default();
        self.walk_dir(root_id, &root_path, &root_path, 0, &mut outcome)
            .await?;

        info!(
            "遍历完成: {} ({} 个条目, {} 个分支失败)",
            root_path,
            outcome.entries.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    #[async_recursion]
    async fn walk_dir(
        &self,
        dir_id: i64,
        dir_path: &str,
        root_path: &str,
        depth: usize,
        outcome: &mut WalkOutcome,
    ) -> PanResult<()> {
        if depth > self.options.max_depth {
            error!(
                "目录层级超过上限 {}，放弃分支: {} (ID={})",
                self.options.max_depth, dir_path, dir_id
            );
            outcome.record_failure(dir_id, dir_path, format!("超过最大深度 {}", self.options.max_depth));
            return Ok(());
        }

        let children = match self
            .lister
            .list_all_children(dir_id, &self.options.list)
            .await
        {
            Ok(children) => children,
            Err(e) if e.is_interrupt() => return Err(e),
            Err(e) => {
                warn!("获取目录列表失败，放弃分支: {} (ID={}): {}", dir_path, dir_id, e);
                outcome.record_failure(dir_id, dir_path, e.to_string());
                return Ok(());
            }
        };

        for mut child in children {
            child.annotate(dir_path, root_path);
            let descend = child.is_dir().then(|| (child.id, child.full_path.clone()));
            outcome.entries.push(child);

            if let Some((id, path)) = descend {
                self.walk_dir(id, &path, root_path, depth + 1, outcome)
                    .await?;
            }
        }
        Ok(())
    }

    /// 并发遍历，输出顺序不确定
    pub async fn walk_concurrent(&self, root_id: i64, root_path: &str) -> PanResult<WalkOutcome> {
        let root_path = normalize_remote_path(root_path)?;
        let workers = self.options.workers.max(1);
        let cancel = self.lister.cancel_token().clone();

        let mut outcome = WalkOutcome::default();
        let mut queue = VecDeque::from([DirTask {
            id: root_id,
            path: root_path.clone(),
            depth: 0,
        }]);
        let mut running: JoinSet<PanResult<Vec<RemoteEntry>>> = JoinSet::new();
        // 任务 ID -> 目录，任务异常退出时据此记录失败分支
        let mut in_flight: HashMap<Id, DirTask> = HashMap::new();

        loop {
            while running.len() < workers {
                let Some(task) = queue.pop_front() else {
                    break;
                };
                if task.depth > self.options.max_depth {
                    error!(
                        "目录层级超过上限 {}，放弃分支: {} (ID={})",
                        self.options.max_depth, task.path, task.id
                    );
                    outcome.record_failure(
                        task.id,
                        &task.path,
                        format!("超过最大深度 {}", self.options.max_depth),
                    );
                    continue;
                }
                if let Err(e) = check_cancelled(&cancel) {
                    running.abort_all();
                    return Err(e);
                }

                let lister = self.lister.clone();
                let options = self.options.list.clone();
                let dir_id = task.id;
                let handle = running.spawn(async move {
                    lister.list_all_children(dir_id, &options).await
                });
                in_flight.insert(handle.id(), task);
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };

            let (task, result) = match joined {
                Ok((id, result)) => match in_flight.remove(&id) {
                    Some(task) => (task, result),
                    None => continue,
                },
                Err(e) => {
                    let Some(task) = in_flight.remove(&e.id()) else {
                        error!("遍历任务异常退出: {}", e);
                        continue;
                    };
                    error!(
                        "遍历任务异常退出，放弃分支: {} (ID={}): {}",
                        task.path, task.id, e
                    );
                    outcome.record_failure(task.id, &task.path, format!("遍历任务异常退出: {}", e));
                    continue;
                }
            };

            match result {
                Ok(children) => {
                    for mut child in children {
                        child.annotate(&task.path, &root_path);
                        if child.is_dir() {
                            queue.push_back(DirTask {
                                id: child.id,
                                path: child.full_path.clone(),
                                depth: task.depth + 1,
                            });
                        }
                        outcome.entries.push(child);
                    }
                }
                Err(e) if e.is_interrupt() => {
                    running.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "获取目录列表失败，放弃分支: {} (ID={}): {}",
                        task.path, task.id, e
                    );
                    outcome.record_failure(task.id, &task.path, e.to_string());
                }
            }
        }

        info!(
            "并发遍历完成: {} ({} 个条目, {} 个分支失败, worker={})",
            root_path,
            outcome.entries.len(),
            outcome.failures.len(),
            workers
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::retry::RetryPolicy;
    use crate::testing::{FakeDrive, FakeFailure};
    use std::collections::HashSet;
    use tokio_util::sync::CancellationToken;

    fn walker(drive: &FakeDrive, max_depth: usize, workers: usize) -> TreeWalker {
        TreeWalker::new(
            PagedLister::new(
                drive.client(),
                RetryPolicy::immediate(2),
                CancellationToken::new(),
            ),
            WalkOptions {
                max_depth,
                workers,
                list: ListOptions::with_page_limit(2),
            },
        )
    }

    /// /root
    ///   a.txt
    ///   sub/
    ///     b.txt
    ///     deep/
    ///       c.txt
    ///   z.txt
    fn sample_tree(drive: &FakeDrive) -> i64 {
        let root = drive.add_dir(0, "root");
        drive.add_file(root, "a.txt", b"a");
        let sub = drive.add_dir(root, "sub");
        drive.add_file(sub, "b.txt", b"b");
        let deep = drive.add_dir(sub, "deep");
        drive.add_file(deep, "c.txt", b"c");
        drive.add_file(root, "z.txt", b"z");
        root
    }

    #[tokio::test]
    async fn test_sequential_walk_is_preorder() {
        let drive = FakeDrive::new();
        let root = sample_tree(&drive);

        let outcome = walker(&drive, 1000, 1).walk(root, "/root").await.unwrap();
        let paths: Vec<&str> = outcome.entries.iter().map(|e| e.full_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/root/a.txt",
                "/root/sub",
                "/root/sub/b.txt",
                "/root/sub/deep",
                "/root/sub/deep/c.txt",
                "/root/z.txt",
            ]
        );
        let relative: Vec<&str> = outcome
            .files()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(relative, vec!["a.txt", "sub/b.txt", "sub/deep/c.txt", "z.txt"]);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_concurrent_walk_matches_sequential_as_set() {
        let drive = FakeDrive::new();
        let root = sample_tree(&drive);

        let sequential = walker(&drive, 1000, 1).walk(root, "/root").await.unwrap();
        let concurrent = walker(&drive, 1000, 4)
            .walk_concurrent(root, "/root")
            .await
            .unwrap();

        let a: HashSet<(i64, String)> = sequential
            .entries
            .iter()
            .map(|e| (e.id, e.relative_path.clone()))
            .collect();
        let b: HashSet<(i64, String)> = concurrent
            .entries
            .iter()
            .map(|e| (e.id, e.relative_path.clone()))
            .collect();
        assert_eq!(a, b);
        assert_eq!(concurrent.entries.len(), 6);
    }

    #[tokio::test]
    async fn test_cyclic_structure_terminates() {
        let drive = FakeDrive::new();
        let root = drive.add_dir_with_id(0, 1, "cyc");
        drive.add_file(root, "ok.txt", b"ok");
        drive.add_dir_with_id(root, 2, "loop");
        // 目录 2 把自己列为子目录
        drive.link_child(2, 2);

        for workers in [1, 3] {
            let w = walker(&drive, 5, workers);
            let outcome = if workers == 1 {
                w.walk(root, "/cyc").await.unwrap()
            } else {
                w.walk_concurrent(root, "/cyc").await.unwrap()
            };
            assert_eq!(outcome.failures.len(), 1);
            assert!(outcome.failures[0].reason.contains("深度"));
            assert!(outcome.files().any(|e| e.name == "ok.txt"));
        }
    }

    #[tokio::test]
    async fn test_branch_failure_does_not_abort_siblings() {
        let drive = FakeDrive::new();
        let root = drive.add_dir(0, "r");
        let bad = drive.add_dir(root, "bad");
        drive.add_file(bad, "lost.txt", b"x");
        let good = drive.add_dir(root, "good");
        drive.add_file(good, "kept.txt", b"y");
        drive.fail_listing_of(bad, FakeFailure::Network);

        for workers in [1, 2] {
            let w = walker(&drive, 1000, workers);
            let outcome = if workers == 1 {
                w.walk(root, "/r").await.unwrap()
            } else {
                w.walk_concurrent(root, "/r").await.unwrap()
            };
            assert_eq!(outcome.failures.len(), 1);
            assert_eq!(outcome.failures[0].dir_id, bad);
            assert!(outcome.files().any(|e| e.name == "kept.txt"));
            assert!(!outcome.files().any(|e| e.name == "lost.txt"));
        }
    }

    #[tokio::test]
    async fn test_panicked_listing_task_only_loses_its_branch() {
        let drive = FakeDrive::new();
        let root = drive.add_dir(0, "r");
        let bad = drive.add_dir(root, "bad");
        drive.add_file(bad, "lost.txt", b"x");
        let good = drive.add_dir(root, "good");
        drive.add_file(good, "kept.txt", b"y");
        drive.fail_listing_of(bad, FakeFailure::Panic);

        let outcome = walker(&drive, 1000, 2)
            .walk_concurrent(root, "/r")
            .await
            .unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].dir_id, bad);
        assert_eq!(outcome.failures[0].path, "/r/bad");
        assert!(outcome.files().any(|e| e.name == "kept.txt"));
        assert!(outcome.directories().any(|e| e.name == "bad"));
    }

    #[tokio::test]
    async fn test_interrupt_propagates_from_walk() {
        let drive = FakeDrive::new();
        let root = sample_tree(&drive);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let w = TreeWalker::new(
            PagedLister::new(drive.client(), RetryPolicy::immediate(2), cancel),
            WalkOptions::default(),
        );

        assert!(w.walk(root, "/root").await.unwrap_err().is_interrupt());
        assert!(w.walk_concurrent(root, "/root").await.unwrap_err().is_interrupt());
    }
}
