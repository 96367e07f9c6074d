mod common;

use common::{Behavior, ScriptedCopier, fast_config, tasks};
use registry_replicator::error::ReplicationError;
use registry_replicator::sync::{BatchExecutor, calculate_statistics, optimize_batches};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_one_result_per_task_in_input_order() {
    let copier = Arc::new(
        ScriptedCopier::new()
            .with("a", Behavior::Succeed { bytes: 10, delay: Duration::from_millis(40) })
            .with("b", Behavior::Permanent)
            .with("c", Behavior::Succeed { bytes: 30, delay: Duration::from_millis(1) }),
    );
    let input = tasks(&["a", "b", "c", "d", "e", "f", "g"]);
    let config = fast_config().with_parallelism(4).with_batch_size(3);
    let executor = BatchExecutor::new(config, copier.clone()).unwrap();

    let outcome = executor.execute(&CancellationToken::new(), input.clone()).await;

    assert!(outcome.is_ok());
    assert_eq!(outcome.results.len(), input.len());
    for (result, task) in outcome.results.iter().zip(&input) {
        assert_eq!(&result.task, task);
    }
    assert!(outcome.results[1].is_failure());
    assert_eq!(outcome.results[0].bytes_copied(), 10);
    assert_eq!(outcome.results[2].bytes_copied(), 30);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_parallelism() {
    let names: Vec<String> = (0..24).map(|i| format!("repo{}", i)).collect();
    let mut copier = ScriptedCopier::new();
    for name in &names {
        copier = copier.with(name, Behavior::Succeed { bytes: 1, delay: Duration::from_millis(15) });
    }
    let copier = Arc::new(copier);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let executor = BatchExecutor::new(
        fast_config().with_parallelism(3).with_batch_size(8),
        copier.clone(),
    )
    .unwrap();

    let outcome = executor.execute(&CancellationToken::new(), tasks(&refs)).await;

    assert_eq!(outcome.results.len(), 24);
    assert!(outcome.results.iter().all(|r| r.is_success()));
    assert!(copier.max_in_flight() <= 3, "saw {} concurrent copies", copier.max_in_flight());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let copier = Arc::new(ScriptedCopier::new().with("flaky", Behavior::Flaky { failures: 2 }));
    let executor = BatchExecutor::new(fast_config().with_retry_attempts(3), copier.clone()).unwrap();

    let outcome = executor.execute(&CancellationToken::new(), tasks(&["flaky"])).await;

    let result = &outcome.results[0];
    assert!(result.is_success());
    assert_eq!(result.attempts, 3);
    assert_eq!(copier.calls("flaky"), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let copier = Arc::new(ScriptedCopier::new().with("down", Behavior::AlwaysTransient));
    let executor = BatchExecutor::new(fast_config().with_retry_attempts(2), copier.clone()).unwrap();

    let outcome = executor.execute(&CancellationToken::new(), tasks(&["down"])).await;

    let result = &outcome.results[0];
    assert!(matches!(result.error(), Some(ReplicationError::Transient(_))));
    assert_eq!(result.attempts, 3);
    assert_eq!(copier.calls("down"), 3);
}

#[tokio::test]
async fn test_attempt_timeout_is_reported() {
    let copier = Arc::new(ScriptedCopier::new().with("slow", Behavior::Hang));
    let config = fast_config()
        .with_timeout(Duration::from_millis(50))
        .with_retry_attempts(1);
    let executor = BatchExecutor::new(config, copier.clone()).unwrap();

    let started = Instant::now();
    let outcome = executor.execute(&CancellationToken::new(), tasks(&["slow"])).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let result = &outcome.results[0];
    assert!(matches!(result.error(), Some(ReplicationError::Timeout(_))));
    assert_eq!(result.attempts, 1);
    assert_eq!(copier.calls("slow"), 1);
}

#[tokio::test]
async fn test_timeout_bounds_all_attempts_of_a_task() {
    let copier = Arc::new(ScriptedCopier::new().with("stalled", Behavior::Hang));
    let config = fast_config()
        .with_backoff(Duration::from_millis(150), Duration::from_secs(1))
        .with_timeout(Duration::from_millis(200))
        .with_retry_attempts(3);
    let executor = BatchExecutor::new(config, copier.clone()).unwrap();

    let started = Instant::now();
    let outcome = executor.execute(&CancellationToken::new(), tasks(&["stalled"])).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(500), "task ran for {:?}", elapsed);
    assert!(matches!(outcome.results[0].error(), Some(ReplicationError::Timeout(_))));
}

#[tokio::test]
async fn test_retry_waits_stop_at_task_deadline() {
    let copier = Arc::new(ScriptedCopier::new().with("down", Behavior::AlwaysTransient));
    let config = fast_config()
        .with_backoff(Duration::from_secs(2), Duration::from_secs(2))
        .with_timeout(Duration::from_millis(100))
        .with_retry_attempts(3);
    let executor = BatchExecutor::new(config, copier.clone()).unwrap();

    let started = Instant::now();
    let outcome = executor.execute(&CancellationToken::new(), tasks(&["down"])).await;

    assert!(started.elapsed() < Duration::from_millis(500));
    let result = &outcome.results[0];
    assert!(matches!(result.error(), Some(ReplicationError::Timeout(_))));
    assert_eq!(copier.calls("down"), 1);
}

#[tokio::test]
async fn test_adaptive_batches_keep_input_order() {
    let names: Vec<String> = (0..40).map(|i| format!("repo{:02}", i)).collect();
    let failing = [0, 1, 2, 4, 5, 7, 9];
    let mut copier = ScriptedCopier::new();
    for (i, name) in names.iter().enumerate() {
        let behavior = if failing.contains(&i) {
            Behavior::Permanent
        } else {
            // Later tasks finish first inside a batch.
            Behavior::Succeed { bytes: i as u64, delay: Duration::from_millis(((40 - i) % 7) as u64 * 3) }
        };
        copier = copier.with(name, behavior);
    }
    let copier = Arc::new(copier);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let input = tasks(&refs);
    let config = fast_config()
        .with_parallelism(4)
        .with_batch_size(8)
        .with_adaptive_batching(2, 12);
    let executor = BatchExecutor::new(config, copier.clone()).unwrap();

    let outcome = executor.execute(&CancellationToken::new(), input.clone()).await;

    assert!(outcome.is_ok());
    assert_eq!(outcome.results.len(), input.len());
    for (i, (result, task)) in outcome.results.iter().zip(&input).enumerate() {
        assert_eq!(&result.task, task, "result {} out of place", i);
        assert_eq!(result.is_failure(), failing.contains(&i));
    }
    assert_eq!(copier.total_calls(), 40);
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let names: Vec<String> = (0..12).map(|i| format!("stuck{}", i)).collect();
    let mut copier = ScriptedCopier::new();
    for name in &names {
        copier = copier.with(name, Behavior::Hang);
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let executor = BatchExecutor::new(
        fast_config().with_parallelism(4).with_timeout(Duration::from_secs(600)),
        Arc::new(copier),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = executor.execute(&cancel, tasks(&refs)).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.results.len(), 12);
    assert!(outcome.error.is_none());
    assert!(
        outcome
            .results
            .iter()
            .all(|r| r.error().is_some_and(|e| e.is_cancellation()))
    );
}

#[tokio::test]
async fn test_all_failures_continue_by_default() {
    let copier = Arc::new(
        ScriptedCopier::new()
            .with("a", Behavior::Permanent)
            .with("b", Behavior::Permanent)
            .with("c", Behavior::Permanent),
    );
    let executor = BatchExecutor::new(fast_config().with_batch_size(1), copier.clone()).unwrap();

    let outcome = executor.execute(&CancellationToken::new(), tasks(&["a", "b", "c"])).await;

    assert!(outcome.is_ok());
    assert!(outcome.results.iter().all(|r| r.is_failure()));
    assert_eq!(copier.total_calls(), 3);

    let stats = calculate_statistics(&outcome.results);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn test_stop_on_error_halts_remaining_batches() {
    let copier = Arc::new(ScriptedCopier::new().with("b", Behavior::Permanent));
    let config = fast_config()
        .with_parallelism(1)
        .with_batch_size(2)
        .with_continue_on_error(false);
    let executor = BatchExecutor::new(config, copier.clone()).unwrap();

    let outcome = executor
        .execute(&CancellationToken::new(), tasks(&["a", "b", "c", "d", "e"]))
        .await;

    assert!(matches!(outcome.error, Some(ReplicationError::StopOnError { .. })));
    assert!(outcome.results[0].is_success());
    assert!(outcome.results[1].is_failure());
    assert!(outcome.results[2..].iter().all(|r| r.is_skipped()));
    assert_eq!(copier.calls("c"), 0);
}

#[tokio::test]
async fn test_priorities_run_first_with_single_worker() {
    let copier = Arc::new(ScriptedCopier::new());
    let mut input = tasks(&["low", "high", "mid"]);
    input[1] = input[1].clone().with_priority(10);
    input[2] = input[2].clone().with_priority(5);
    let ordered = optimize_batches(input);

    let executor = BatchExecutor::new(fast_config().with_parallelism(1), copier).unwrap();
    let outcome = executor.execute(&CancellationToken::new(), ordered).await;

    let order: Vec<&str> = outcome
        .results
        .iter()
        .map(|r| r.task.source_repository.as_str())
        .collect();
    assert_eq!(order, vec!["high", "mid", "low"]);
}
