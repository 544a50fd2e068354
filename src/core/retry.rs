//! 统一重试策略
//!
//! 遍历的分支选择、执行循环的两处再生成都用同一个 retry_with_budget：
//! 有界尝试次数 + 可选退避，并保留历次尝试中得分最高的结果（择优而非只取末次）。

use std::future::Future;
use std::time::Duration;

/// 单次尝试的判定：Accept 立即结束重试；Reject 继续下一次，score 用于择优保留
#[derive(Debug)]
pub enum Verdict<T> {
    Accept(T),
    Reject { value: T, score: f64 },
}

/// 重试结束后的汇总：最终值、是否被接受、实际尝试次数
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub accepted: bool,
    pub attempts: u32,
}

/// 有界重试：最多 max_attempts 次尝试（含首次），重试间线性退避（backoff_step * 已试次数）
///
/// attempt 闭包收到从 0 开始的尝试序号；返回 Err 立即终止（oracle 故障等不靠重复解决的错误），
/// 返回 Reject 则记录得分并继续。预算耗尽时返回得分最高的 Reject 值（同分保留先到者，保证确定性）。
pub async fn retry_with_budget<T, E, F, Fut>(
    max_attempts: u32,
    backoff_step: Duration,
    mut attempt: F,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Verdict<T>, E>>,
{
    assert!(max_attempts > 0, "retry budget must allow at least one attempt");
    let mut best: Option<(f64, T)> = None;
    let mut attempts = 0;

    for i in 0..max_attempts {
        attempts = i + 1;
        match attempt(i).await? {
            Verdict::Accept(value) => {
                return Ok(RetryOutcome {
                    value,
                    accepted: true,
                    attempts,
                });
            }
            Verdict::Reject { value, score } => {
                let better = match &best {
                    Some((b, _)) => score > *b,
                    None => true,
                };
                if better {
                    best = Some((score, value));
                }
            }
        }
        if i + 1 < max_attempts {
            let wait = backoff_step * (i + 1);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    // 预算耗尽，best 必然已有值：闭包至少跑了一次且未 Accept
    let (_, value) = best.expect("retry budget exhausted without any attempt");
    Ok(RetryOutcome {
        value,
        accepted: false,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_accept_on_first_attempt() {
        let out: Result<_, String> =
            retry_with_budget(4, Duration::ZERO, |_| async { Ok(Verdict::Accept(42)) }).await;
        let out = out.unwrap();
        assert!(out.accepted);
        assert_eq!(out.value, 42);
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_exhausts_budget_and_keeps_best() {
        let calls = AtomicU32::new(0);
        let out: Result<_, String> = retry_with_budget(4, Duration::ZERO, |i| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                // 第二次尝试得分最高
                let score = if i == 1 { 0.7 } else { 0.3 };
                Ok(Verdict::Reject { value: i, score })
            }
        })
        .await;
        let out = out.unwrap();
        assert!(!out.accepted);
        assert_eq!(out.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(out.value, 1);
    }

    #[tokio::test]
    async fn test_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let out: Result<RetryOutcome<u32>, String> = retry_with_budget(4, Duration::ZERO, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("oracle down".to_string()) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_midway_stops() {
        let calls = AtomicU32::new(0);
        let out: Result<_, String> = retry_with_budget(4, Duration::ZERO, |i| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if i < 2 {
                    Ok(Verdict::Reject { value: i, score: 0.1 })
                } else {
                    Ok(Verdict::Accept(i))
                }
            }
        })
        .await;
        let out = out.unwrap();
        assert!(out.accepted);
        assert_eq!(out.value, 2);
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_first() {
        let out: Result<_, String> = retry_with_budget(3, Duration::ZERO, |i| async move {
            Ok(Verdict::Reject { value: i, score: 0.5 })
        })
        .await;
        assert_eq!(out.unwrap().value, 0);
    }
}
