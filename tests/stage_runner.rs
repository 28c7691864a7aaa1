//! Bounded-concurrency stage execution: ordering, partial failure, cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use llm_coding_analysis::clients::LlmError;
use llm_coding_analysis::pipeline::{Stage, WorkItem, run_stage};
use llm_coding_analysis::PipelineError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Job {
    id: usize,
    delay_ms: u64,
}

impl WorkItem for Job {
    fn label(&self) -> String {
        format!("job-{}", self.id)
    }
}

fn jobs(delays: &[u64]) -> Vec<Job> {
    delays
        .iter()
        .enumerate()
        .map(|(id, &delay_ms)| Job { id, delay_ms })
        .collect()
}

#[tokio::test]
async fn successes_keep_input_order_whatever_the_completion_order() {
    // Earlier items finish last
    let items = jobs(&[80, 60, 40, 20, 0]);
    let outcome = run_stage(
        Stage::Requirements,
        items,
        |job: Job| async move {
            tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
            Ok(job.id * 10)
        },
        5,
        &CancellationToken::new(),
    )
    .await;

    let values: Vec<usize> = outcome.successes.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![0, 10, 20, 30, 40]);
    let indices: Vec<usize> = outcome.successes.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(outcome.failed(), 0);
}

#[tokio::test]
async fn empty_batch_returns_without_spawning() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&spawned);
    let outcome = run_stage(
        Stage::Code,
        Vec::<Job>::new(),
        move |_job: Job| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        },
        4,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.total, 0);
    assert_eq!(outcome.succeeded(), 0);
    assert_eq!(outcome.failed(), 0);
    assert!(!outcome.is_total_failure());
    assert_eq!(spawned.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn never_exceeds_max_parallelism() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));

    let outcome = run_stage(
        Stage::Code,
        jobs(&[10; 12]),
        move |job: Job| {
            let running = Arc::clone(&r);
            let peak = Arc::clone(&p);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(job.id)
            }
        },
        3,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.succeeded(), 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn parallelism_above_item_count_still_runs_everything() {
    let outcome = run_stage(
        Stage::Requirements,
        jobs(&[0, 0]),
        |job: Job| async move { Ok(job.id) },
        64,
        &CancellationToken::new(),
    )
    .await;
    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.dispatched, 2);
}

#[tokio::test]
async fn failures_do_not_stop_siblings_and_keep_identity() {
    let outcome = run_stage(
        Stage::Dependencies,
        jobs(&[5, 0, 5, 0]),
        |job: Job| async move {
            match job.id {
                1 => Err(PipelineError::Llm(LlmError::RateLimit("429".into()))),
                2 => Err(PipelineError::Format {
                    kind: "framework-list",
                    attempts: 3,
                    message: "not JSON".into(),
                }),
                _ => Ok(job.id),
            }
        },
        2,
        &CancellationToken::new(),
    )
    .await;

    let ok: Vec<usize> = outcome.successes.iter().map(|s| s.value).collect();
    assert_eq!(ok, vec![0, 3]);
    let failed: Vec<&str> = outcome.failures.iter().map(|f| f.item.as_str()).collect();
    assert_eq!(failed, vec!["job-1", "job-2"]);
    assert_eq!(outcome.failures[0].error.kind(), "rate-limit");
    assert_eq!(outcome.failures[1].error.kind(), "format");
    assert!(!outcome.is_total_failure());
}

#[tokio::test]
async fn every_item_failing_is_a_total_failure() {
    let outcome = run_stage(
        Stage::Code,
        jobs(&[0, 0, 0]),
        |_job: Job| async move {
            Err::<(), _>(PipelineError::Llm(LlmError::Transport("down".into())))
        },
        2,
        &CancellationToken::new(),
    )
    .await;
    assert!(outcome.is_total_failure());
    assert_eq!(outcome.summary().failed, 3);
}

#[tokio::test]
async fn panicking_task_is_recorded_as_internal_failure() {
    let outcome = run_stage(
        Stage::Code,
        jobs(&[0, 0, 0]),
        |job: Job| async move {
            if job.id == 1 {
                panic!("model returned something cursed");
            }
            Ok(job.id)
        },
        3,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.item, "job-1");
    assert_eq!(failure.error.kind(), "internal");
    assert!(failure.error.to_string().contains("cursed"));
}

#[tokio::test]
async fn cancellation_stops_dispatch_but_lets_in_flight_finish() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);

    let outcome = run_stage(
        Stage::Requirements,
        jobs(&[20, 0, 0, 0]),
        move |job: Job| {
            let trigger = trigger.clone();
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if job.id == 0 {
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;
                }
                Ok(job.id)
            }
        },
        1,
        &cancel,
    )
    .await;

    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.dispatched, 1);
    assert_eq!(outcome.successes.len(), 1);
    assert_eq!(outcome.successes[0].value, 0);
    assert_eq!(outcome.failures.len(), 3);
    assert!(
        outcome
            .failures
            .iter()
            .all(|f| matches!(f.error, PipelineError::Cancelled))
    );
    let cancelled: Vec<usize> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(cancelled, vec![1, 2, 3]);
}
