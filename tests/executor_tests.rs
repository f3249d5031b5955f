//! # Executor Integration Tests
//!
//! End-to-end scenarios for the task execution engine:
//!
//! 1. Basic runs - Insight → Action ordering and element handoff
//! 2. Append - init/pending transitions, append during an in-flight flush
//! 3. Failure - fail/cancel cascade, halted-run rejection, append-resume
//! 4. Dumps - mid-run snapshots, idempotence, redaction
//! 5. Audit trail - event ordering for completed and halted runs
//! 6. Concurrency - concurrent flush callers share one pass

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use baton::{
    Executor, ExecutorError, FixSuggestion, LiveResource, RunStatus, TaskContext, TaskKind,
    TaskOutput, TaskSpec, TaskStatus, TaskValue,
};
use serde_json::json;
use tokio::time::{sleep, Duration};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// The element payload a perception query would resolve.
fn fake_element() -> serde_json::Value {
    json!({
        "id": "btn-submit",
        "rect": { "left": 10, "top": 20, "width": 80, "height": 24 }
    })
}

/// Perception task resolving a fixed element, optionally failing after a
/// delay (the delay stands in for an executor-owned timeout).
fn insight_find_task(should_throw: bool) -> TaskSpec {
    TaskSpec::insight_find(json!({ "query": "submit button" }), move |_param, _ctx| async move {
        if should_throw {
            sleep(Duration::from_millis(100)).await;
            anyhow::bail!("element not found");
        }
        Ok(
            TaskOutput::new(json!({ "element": fake_element() })).with_log(json!({
                "dump": { "query": "submit button", "matched": 1 }
            })),
        )
    })
}

/// Interaction task that bumps a counter, after an optional delay.
fn counting_action(calls: Arc<AtomicUsize>, delay_ms: u64) -> TaskSpec {
    TaskSpec::action(json!({ "action": "tap" }), move |_param, _ctx| async move {
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutput::new(json!({ "tapped": true })))
    })
}

// ============================================================================
// BASIC RUNS - ordering and element handoff
// ============================================================================

mod basic_runs {
    use super::*;

    #[tokio::test]
    async fn insight_then_action_completes_with_handoff() {
        init_tracing();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen: Arc<Mutex<Option<(TaskValue, TaskContext)>>> = Arc::new(Mutex::new(None));

        let tap_param = json!({ "action": "tap", "anything": "acceptable" });
        let action_task = TaskSpec::action(tap_param.clone(), {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            move |param, context| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock().unwrap() = Some((param, context));
                Ok(TaskOutput::new(json!({ "tapped": true })))
            }
        });

        let executor = Executor::builder("test")
            .description("hello, this is a test")
            .tasks([insight_find_task(false), action_task])
            .build();

        let result = executor.flush().await.unwrap();
        assert_eq!(result, Some(TaskValue::from(json!({ "tapped": true }))));
        assert_eq!(executor.status(), RunStatus::Completed);

        let dump = executor.dump();
        assert!(dump.log_time > 0);
        assert_eq!(dump.tasks.len(), 2);
        for task in &dump.tasks {
            assert_eq!(task.status, TaskStatus::Success);
            assert!(task.timing.unwrap().end.is_some());
        }
        assert_eq!(dump.tasks[0].output.as_ref().unwrap()["element"], fake_element());
        assert!(dump.tasks[0].log.as_ref().unwrap()["dump"].is_object());

        // the action executor ran once, with its own param and the element
        // the insight task resolved
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (param, context) = seen.lock().unwrap().take().unwrap();
        assert_eq!(param, TaskValue::from(tap_param));
        assert_eq!(context.task.index, 1);
        assert_eq!(context.task.kind, TaskKind::Action);
        assert_eq!(context.element, Some(TaskValue::from(fake_element())));
    }

    #[tokio::test]
    async fn action_without_preceding_insight_gets_no_element() {
        let seen: Arc<Mutex<Option<TaskContext>>> = Arc::new(Mutex::new(None));
        let executor = Executor::builder("test")
            .task(TaskSpec::action(json!({ "action": "tap" }), {
                let seen = Arc::clone(&seen);
                move |_param, context| async move {
                    *seen.lock().unwrap() = Some(context);
                    Ok(TaskOutput::new(json!(null)))
                }
            }))
            .build();

        executor.flush().await.unwrap();
        assert!(seen.lock().unwrap().take().unwrap().element.is_none());
    }
}

// ============================================================================
// APPEND - status transitions and append during flush
// ============================================================================

mod append {
    use super::*;

    #[tokio::test]
    async fn init_append_and_append_while_running() {
        init_tracing();

        let executor = Executor::new("test");
        assert_eq!(executor.status(), RunStatus::Init);

        let slow_calls = Arc::new(AtomicUsize::new(0));
        let late_calls = Arc::new(AtomicUsize::new(0));

        executor.append(insight_find_task(false));
        executor.append(counting_action(Arc::clone(&slow_calls), 500));
        assert_eq!(executor.status(), RunStatus::Pending);
        assert_eq!(executor.task_count(), 2);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 0);

        assert_eq!(executor.dump().tasks.len(), 2);

        // append while running: the in-flight pass must pick the task up
        let appender = executor.clone();
        let late = Arc::clone(&late_calls);
        let (flushed, _) = tokio::join!(executor.flush(), async move {
            assert_eq!(appender.status(), RunStatus::Running);
            sleep(Duration::from_millis(200)).await;
            appender.append(counting_action(late, 0));
            assert_eq!(appender.status(), RunStatus::Running);
        });

        flushed.unwrap();
        assert_eq!(executor.status(), RunStatus::Completed);
        assert_eq!(executor.task_count(), 3);
        assert_eq!(executor.dump().tasks[2].status, TaskStatus::Success);
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);

        // append while completed re-opens the run
        executor.append(counting_action(Arc::new(AtomicUsize::new(0)), 0));
        assert_eq!(executor.status(), RunStatus::Pending);
        assert_eq!(executor.dump().tasks.len(), 4);
    }
}

// ============================================================================
// FAILURE - cancellation cascade and resume
// ============================================================================

mod failure {
    use super::*;

    #[tokio::test]
    async fn failed_task_cancels_the_rest_and_halts_the_run() {
        let skipped_calls = Arc::new(AtomicUsize::new(0));
        let executor = Executor::builder("test")
            .description("test-description")
            .tasks([
                insight_find_task(true),
                counting_action(Arc::clone(&skipped_calls), 0),
            ])
            .build();

        let result = executor.flush().await.unwrap();
        assert!(result.is_none());
        assert_eq!(executor.status(), RunStatus::Error);

        let dump = executor.dump();
        assert_eq!(dump.tasks.len(), 2);

        let failed = &dump.tasks[0];
        assert_eq!(failed.status, TaskStatus::Fail);
        assert!(failed.error.as_ref().unwrap().contains("element not found"));
        assert!(failed.output.is_none());
        assert!(failed.timing.unwrap().end.is_some());

        let cancelled = &dump.tasks[1];
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.error.is_none());
        assert!(cancelled.timing.is_none());
        assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);

        // flushing a halted run fails fast
        let err = executor.flush().await.unwrap_err();
        assert!(matches!(err, ExecutorError::RunHalted { .. }));
        assert!(err.fix_suggestion().is_some());
    }

    #[tokio::test]
    async fn append_after_error_resumes_the_new_tail_only() {
        let executor = Executor::builder("test")
            .tasks([insight_find_task(true), insight_find_task(false)])
            .build();
        executor.flush().await.unwrap();
        assert_eq!(executor.status(), RunStatus::Error);

        let resumed_calls = Arc::new(AtomicUsize::new(0));
        executor.append(counting_action(Arc::clone(&resumed_calls), 0));
        assert_eq!(executor.status(), RunStatus::Pending);

        let result = executor.flush().await.unwrap();
        assert_eq!(result, Some(TaskValue::from(json!({ "tapped": true }))));
        assert_eq!(executor.status(), RunStatus::Completed);
        assert_eq!(resumed_calls.load(Ordering::SeqCst), 1);

        // earlier records are untouched: no retry of the failed task
        let dump = executor.dump();
        assert_eq!(dump.tasks[0].status, TaskStatus::Fail);
        assert_eq!(dump.tasks[1].status, TaskStatus::Cancelled);
        assert_eq!(dump.tasks[2].status, TaskStatus::Success);
    }
}

// ============================================================================
// DUMPS - mid-run snapshots, idempotence, redaction
// ============================================================================

mod dumps {
    use super::*;

    #[tokio::test]
    async fn dump_mid_run_sees_the_growing_queue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = Executor::builder("test")
            .task(counting_action(Arc::clone(&calls), 300))
            .build();

        let observer = executor.clone();
        let (flushed, _) = tokio::join!(executor.flush(), async move {
            sleep(Duration::from_millis(100)).await;

            let dump = observer.dump();
            assert_eq!(dump.status, RunStatus::Running);
            assert_eq!(dump.tasks.len(), 1);
            assert_eq!(dump.tasks[0].status, TaskStatus::Running);
            assert!(dump.tasks[0].timing.unwrap().start.is_some());

            // the tail may grow while the snapshot is taken
            observer.append(counting_action(Arc::new(AtomicUsize::new(0)), 0));
            let dump = observer.dump();
            assert_eq!(dump.tasks.len(), 2);
            assert_eq!(dump.tasks[1].status, TaskStatus::Pending);
        });

        flushed.unwrap();
        assert_eq!(executor.status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn back_to_back_dumps_differ_only_in_log_time() {
        let executor = Executor::builder("test")
            .description("idempotence")
            .tasks([insight_find_task(false)])
            .build();
        executor.flush().await.unwrap();

        let first = executor.dump();
        let second = executor.dump();
        assert_eq!(first.id, second.id);
        assert_eq!(first.description, second.description);
        assert_eq!(first.status, second.status);
        assert_eq!(first.tasks, second.tasks);
        assert!(second.log_time >= first.log_time);
    }

    struct FakePage;

    impl LiveResource for FakePage {
        fn resource_kind(&self) -> &str {
            "Page"
        }
    }

    #[tokio::test]
    async fn live_resources_are_redacted_in_dumps() {
        let page: Arc<dyn LiveResource> = Arc::new(FakePage);
        let param = TaskValue::object([
            ("query", TaskValue::from(json!("submit button"))),
            ("page", TaskValue::resource(Arc::clone(&page))),
        ]);

        let executor = Executor::builder("test")
            .task(TaskSpec::insight_find(param, move |_param, _ctx| async move {
                Ok(TaskOutput::new(TaskValue::object([
                    ("element", TaskValue::from(fake_element())),
                    ("page", TaskValue::resource(page)),
                ])))
            }))
            .build();
        executor.flush().await.unwrap();

        let dump = executor.dump();
        assert_eq!(dump.tasks[0].param["page"], json!("[Page object]"));
        assert_eq!(dump.tasks[0].param["query"], json!("submit button"));
        let output = dump.tasks[0].output.as_ref().unwrap();
        assert_eq!(output["page"], json!("[Page object]"));
        assert_eq!(output["element"], fake_element());

        // the whole snapshot must survive a plain stringify
        assert!(serde_json::to_string(&dump).is_ok());
    }
}

// ============================================================================
// AUDIT TRAIL - event ordering
// ============================================================================

mod audit_trail {
    use super::*;
    use baton::EventKind;

    fn kinds(executor: &Executor) -> Vec<EventKind> {
        executor.events().events().into_iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn completed_run_trail_is_ordered() {
        let executor = Executor::builder("test")
            .tasks([
                insight_find_task(false),
                counting_action(Arc::new(AtomicUsize::new(0)), 0),
            ])
            .build();
        executor.flush().await.unwrap();

        let kinds = kinds(&executor);
        assert!(matches!(kinds[0], EventKind::TaskAppended { index: 0, .. }));
        assert!(matches!(kinds[1], EventKind::TaskAppended { index: 1, .. }));
        assert!(matches!(kinds[2], EventKind::FlushStarted { queued: 2 }));
        assert!(matches!(kinds[3], EventKind::TaskStarted { index: 0 }));
        assert!(matches!(kinds[4], EventKind::TaskSucceeded { index: 0, .. }));
        assert!(matches!(kinds[5], EventKind::TaskStarted { index: 1 }));
        assert!(matches!(kinds[6], EventKind::TaskSucceeded { index: 1, .. }));
        assert!(matches!(kinds[7], EventKind::RunCompleted { .. }));
    }

    #[tokio::test]
    async fn halted_run_trail_records_the_cascade() {
        let executor = Executor::builder("test")
            .tasks([
                insight_find_task(true),
                counting_action(Arc::new(AtomicUsize::new(0)), 0),
            ])
            .build();
        executor.flush().await.unwrap();

        let kinds = kinds(&executor);
        let tail = &kinds[kinds.len() - 3..];
        assert!(matches!(tail[0], EventKind::TaskFailed { index: 0, .. }));
        assert!(matches!(tail[1], EventKind::TaskCancelled { index: 1 }));
        assert!(matches!(tail[2], EventKind::RunHalted { failed_index: 0 }));
    }
}

// ============================================================================
// CONCURRENCY - concurrent flush callers
// ============================================================================

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn concurrent_flush_callers_share_one_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = Executor::builder("test")
            .tasks([
                counting_action(Arc::clone(&calls), 50),
                counting_action(Arc::clone(&calls), 50),
            ])
            .build();

        let other = executor.clone();
        let (a, b) = tokio::join!(executor.flush(), other.flush());
        a.unwrap();
        b.unwrap();

        // no task ran twice
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.status(), RunStatus::Completed);
    }
}
