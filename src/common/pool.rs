// 有界并发执行
//
// Semaphore 控制同时运行的任务数，JoinSet 收集结果；
// 每个任务返回自己的结果，由调用方按输入顺序汇总

use crate::error::{PanError, PanResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// 以最多 `workers` 个并发执行 `job`，按输入顺序返回每项结果
///
/// 任一项返回 Interrupted（或 token 被取消）时中止其余任务并返回 Err(Interrupted)；
/// 单个任务 panic 只记为该项的 TransferFailed
pub async fn run_bounded<I, T, F, Fut>(
    items: Vec<I>,
    workers: usize,
    cancel: &CancellationToken,
    job: F,
) -> PanResult<Vec<PanResult<T>>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = PanResult<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set: JoinSet<(usize, PanResult<T>)> = JoinSet::new();
    let mut indices: HashMap<Id, usize> = HashMap::new();
    let count = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let fut = job(item);
        let handle = join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, Err(PanError::Interrupted)),
            };
            if cancel.is_cancelled() {
                return (index, Err(PanError::Interrupted));
            }
            (index, fut.await)
        });
        indices.insert(handle.id(), index);
    }

    let mut results: Vec<Option<PanResult<T>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = join_set.join_next_with_id().await {
        let (index, result) = match joined {
            Ok((_, done)) => done,
            Err(e) => {
                error!("并发任务异常退出: {}", e);
                let Some(index) = indices.get(&e.id()).copied() else {
                    continue;
                };
                (
                    index,
                    Err(PanError::TransferFailed(format!("并发任务异常退出: {}", e))),
                )
            }
        };
        if matches!(result, Err(PanError::Interrupted)) {
            join_set.abort_all();
            return Err(PanError::Interrupted);
        }
        results[index] = Some(result);
    }

    Ok(results
        .into_iter()
        .map(|r| r.unwrap_or(Err(PanError::Interrupted)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let cancel = CancellationToken::new();
        let results = run_bounded(vec![30u64, 10, 20], 3, &cancel, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .await
        .unwrap();

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..10).collect::<Vec<u32>>(), 2, &cancel, |_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_item_failure_is_isolated_but_interrupt_aborts() {
        let cancel = CancellationToken::new();
        let results = run_bounded(vec![1, 2, 3], 2, &cancel, |n| async move {
            if n == 2 {
                Err(PanError::TransferFailed("bad".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert!(results[1].is_err());
        assert!(results[0].is_ok() && results[2].is_ok());

        let err = run_bounded(vec![1, 2, 3], 1, &cancel, |n| async move {
            if n == 2 {
                Err(PanError::Interrupted)
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap_err();
        assert!(err.is_interrupt());
    }

    #[tokio::test]
    async fn test_panicked_job_fails_only_its_item() {
        let cancel = CancellationToken::new();
        let results = run_bounded(vec![1, 2, 3], 2, &cancel, |n| async move {
            if n == 2 {
                panic!("job {} exploded", n);
            }
            Ok(n)
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 3);
        assert!(matches!(results[1], Err(PanError::TransferFailed(_))));
        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert_eq!(results[2].as_ref().unwrap(), &3);
    }
}
