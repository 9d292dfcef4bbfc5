//! End-to-end runs of the concurrent harness against the in-memory service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use kv_stress::mock::{ScriptStep, ScriptedFactory, ScriptedService};
use kv_stress::{partition, ConcurrentLoadHarness, RetryPolicy, StressError, WorkerCount};

fn policy(max_retries: u32, base_ms: u64) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(base_ms)).unwrap()
}

#[tokio::test]
async fn uneven_split_accounts_for_every_write() {
    assert_eq!(partition(23, 4), vec![8, 5, 5, 5]);

    let service = Arc::new(ScriptedService::new());
    let harness = ConcurrentLoadHarness::new(ScriptedFactory::new(service.clone()), policy(3, 1))
        .with_seed(42)
        .with_progress_every(5);

    let result = harness.run(23, WorkerCount::Four, 64).await.unwrap();

    assert_eq!(result.success_count + result.failure_count, 23);
    assert_eq!(result.success_count, 23);
    assert_eq!(result.latency.len(), 23);
    assert_eq!(result.generated_keys.len(), 23);
    assert_eq!(harness.factory().connections(), 4);

    let distinct: HashSet<_> = result.generated_keys.iter().collect();
    assert_eq!(distinct.len(), 23);
    assert_eq!(service.len(), 23);
}

#[tokio::test(start_paused = true)]
async fn ten_percent_contention_only_fails_after_five_consecutive_locks() {
    let service = Arc::new(
        ScriptedService::new()
            .with_random_contention(0.10, 64, 2024)
            .with_service_time(Duration::from_millis(1)),
    );
    let harness = ConcurrentLoadHarness::new(ScriptedFactory::new(service.clone()), policy(5, 20))
        .with_seed(7);

    let result = harness.run(100, WorkerCount::Four, 128).await.unwrap();

    assert_eq!(result.success_count + result.failure_count, 100);
    assert_eq!(result.writes, 100);

    let mut per_key: HashMap<String, Vec<bool>> = HashMap::new();
    for attempt in service.set_attempts() {
        per_key.entry(attempt.key).or_default().push(attempt.contended);
    }
    assert_eq!(per_key.len(), 100);
    assert_eq!(result.set_attempts as usize, service.set_calls());

    let mut failed_keys = 0;
    for (key, attempts) in &per_key {
        assert!(attempts.len() <= 5, "{} made {} attempts", key, attempts.len());
        if service.value_of(key).is_none() {
            failed_keys += 1;
            assert_eq!(attempts, &vec![true; 5]);
        } else {
            // Every attempt before the successful one was contended.
            let (last, earlier) = attempts.split_last().unwrap();
            assert!(!last);
            assert!(earlier.iter().all(|&c| c));
        }
    }
    assert_eq!(failed_keys, result.failure_count);

    // Contention seen on the wire is at least what the failures report.
    let contended_attempts = per_key.values().flatten().filter(|&&c| c).count() as u64;
    assert!(result.contention.total() <= contended_attempts);
    assert_eq!(result.contention.total(), result.failure_count);
}

#[tokio::test]
async fn refused_connection_surfaces_worker_fault() {
    let service = Arc::new(ScriptedService::new());
    let factory = ScriptedFactory::new(service).refuse_worker(2);
    let harness = ConcurrentLoadHarness::new(factory, policy(3, 1));

    let err = harness.run(40, WorkerCount::Four, 16).await.unwrap_err();

    match err {
        StressError::WorkerFailed {
            worker,
            source,
            partial,
        } => {
            assert_eq!(worker, 2);
            assert!(matches!(*source, StressError::Connect { .. }));
            // The three healthy workers wrote their 10 keys each.
            assert_eq!(partial.total_operations(), 30);
            assert_eq!(partial.success_count, 30);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn panicking_worker_is_not_dropped_silently() {
    let service = Arc::new(ScriptedService::new());
    service.push_set_steps([ScriptStep::Panic]);
    let harness = ConcurrentLoadHarness::new(ScriptedFactory::new(service), policy(3, 1));

    let err = harness.run(16, WorkerCount::Two, 16).await.unwrap_err();

    assert!(matches!(err, StressError::WorkerPanicked { .. }), "{}", err);
    // The other worker's share of 8 writes is kept.
    let partial = err.partial_result().unwrap();
    assert_eq!(partial.total_operations(), 8);
}

#[tokio::test]
async fn stop_flag_prevents_new_operations() {
    let service = Arc::new(ScriptedService::new());
    let stop = Arc::new(AtomicBool::new(true));
    let harness = ConcurrentLoadHarness::new(ScriptedFactory::new(service.clone()), policy(3, 1))
        .with_stop_flag(stop);

    let result = harness.run(64, WorkerCount::Eight, 16).await.unwrap();

    assert_eq!(result.total_operations(), 0);
    assert_eq!(service.set_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn thirty_two_workers_on_threads() {
    let service = Arc::new(ScriptedService::new().with_random_contention(0.05, 8, 99));
    let harness = ConcurrentLoadHarness::new(ScriptedFactory::new(service.clone()), policy(4, 1))
        .with_seed(1);

    let result = harness.run(1000, WorkerCount::ThirtyTwo, 32).await.unwrap();

    assert_eq!(result.total_operations(), 1000);
    assert_eq!(harness.factory().connections(), 32);
    assert_eq!(result.set_attempts as usize, service.set_calls());
    assert_eq!(service.len() as u64, result.success_count);
}
