// tests/rollback.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tcc::{AbortedError, TaskArgs, TaskError, TaskHandle, TccError, UndoArgs};
use tcc_test_utils::builders::{
    NameLog, SumController, cancel_aware_task, depend_on_all, fatal_task, logged_sum_task,
    recording_undo, sum_task, terminate_on_all,
};
use tcc_test_utils::{init_tracing, with_timeout};

fn expect_aborted(err: TccError) -> AbortedError {
    match err {
        TccError::Aborted(aborted) => aborted,
        other => panic!("expected an aborted run, got {other:?}"),
    }
}

async fn fail_after_delay(args: TaskArgs<i64, i64>) -> Result<i64, TaskError> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Err(TaskError::fatal(anyhow!("{} failed", args.name)))
}

/// `t0 -> t1 -> ... -> t{n-1} -> fail`, termination on `fail`.
///
/// Success order is the chain order, so compensation order is fully
/// determined.
fn chain_then_failure(ctl: &mut SumController, n: usize) -> Vec<TaskHandle> {
    let mut handles = Vec::with_capacity(n + 1);
    for i in 0..n {
        let h = ctl.add_task(format!("t{i}"), sum_task, 1);
        if let Some(prev) = handles.last().copied() {
            depend_on_all(ctl, h, &[prev]);
        }
        handles.push(h);
    }
    let fail = ctl.add_task("fail", fatal_task, 0);
    if let Some(prev) = handles.last().copied() {
        depend_on_all(ctl, fail, &[prev]);
    }
    terminate_on_all(ctl, &[fail]);
    handles.push(fail);
    handles
}

fn names(range: impl Iterator<Item = usize>) -> Vec<String> {
    range.map(|i| format!("t{i}")).collect()
}

// Single-threaded runtime: a successful node records its name and pushes its
// undo entry within one poll, so `succeeded` is exactly the push order.
#[tokio::test(flavor = "current_thread")]
async fn fatal_failure_in_large_fan_in_rolls_back_every_success() {
    init_tracing();
    let undone = NameLog::new();
    let succeeded = NameLog::new();
    let mut ctl = SumController::new();

    let end = ctl.add_task("mid", sum_task, 0);
    ctl.set_undo(end, recording_undo(undone.clone(), false), false)
        .unwrap();

    let mut inputs = Vec::new();
    for i in 0..99 {
        let h = match i {
            96 => ctl.add_task(i.to_string(), fail_after_delay, 1),
            97 | 98 => ctl.add_task(i.to_string(), cancel_aware_task, 1),
            _ => ctl.add_task(i.to_string(), logged_sum_task(succeeded.clone()), 1),
        };
        ctl.set_undo(h, recording_undo(undone.clone(), false), false)
            .unwrap();
        inputs.push(h);
    }
    depend_on_all(&mut ctl, end, &inputs);
    terminate_on_all(&mut ctl, &[end]);

    let aborted = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    assert_eq!(aborted.failed_tasks().collect::<Vec<_>>(), vec!["96"]);
    assert!(aborted.undo_errors.is_empty());

    let mut cancelled: Vec<&str> = aborted
        .cancelled
        .iter()
        .map(|m| m.task_name.as_str())
        .collect();
    cancelled.sort();
    assert_eq!(cancelled, vec!["97", "98"]);
    assert!(aborted.cancelled[0].state.contains("stopped at step 1"));

    // Every success is compensated exactly once, most recent first.
    let mut want = succeeded.entries();
    assert_eq!(want.len(), 96);
    want.reverse();
    assert_eq!(undone.entries(), want);
}

#[tokio::test]
async fn compensations_run_in_reverse_success_order() {
    init_tracing();
    let undone = NameLog::new();
    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 5);
    for h in &handles {
        ctl.set_undo(*h, recording_undo(undone.clone(), false), false)
            .unwrap();
    }

    let aborted = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    assert_eq!(aborted.failed_tasks().collect::<Vec<_>>(), vec!["fail"]);
    assert_eq!(undone.entries(), names((0..5).rev()));
}

#[tokio::test]
async fn failing_compensation_without_skip_stops_the_rollback() {
    init_tracing();
    let undone = NameLog::new();
    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 5);
    for (i, h) in handles.iter().enumerate() {
        ctl.set_undo(*h, recording_undo(undone.clone(), i == 2), false)
            .unwrap();
    }

    let aborted = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    assert_eq!(undone.entries(), names([4, 3, 2].into_iter()));
    assert_eq!(aborted.undo_errors.len(), 1);
    assert_eq!(aborted.undo_errors[0].task_name, "t2");
}

#[tokio::test]
async fn failing_compensation_with_skip_keeps_rolling_back() {
    init_tracing();
    let undone = NameLog::new();
    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 5);
    for (i, h) in handles.iter().enumerate() {
        let fail = i == 1 || i == 2 || i == 4;
        ctl.set_undo(*h, recording_undo(undone.clone(), fail), true)
            .unwrap();
    }

    let aborted = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    assert_eq!(undone.entries(), names((0..5).rev()));
    let failed: Vec<&str> = aborted
        .undo_errors
        .iter()
        .map(|m| m.task_name.as_str())
        .collect();
    assert_eq!(failed, vec!["t4", "t2", "t1"]);
}

#[tokio::test]
async fn compensations_see_the_failure_records_so_far() {
    init_tracing();
    type Seen = (Vec<String>, Vec<String>);
    let seen: Arc<Mutex<Option<Seen>>> = Arc::new(Mutex::new(None));
    let undone = NameLog::new();

    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 3);

    // Rollback visits t2, then t1, then t0.
    ctl.set_undo(handles[2], recording_undo(undone.clone(), true), true)
        .unwrap();
    {
        let seen = Arc::clone(&seen);
        ctl.set_undo(
            handles[1],
            move |undo: UndoArgs<i64, i64>| {
                let task_errors = undo.task_errors.iter().map(|m| m.task_name.clone()).collect();
                let undo_errors = undo.undo_errors.iter().map(|m| m.task_name.clone()).collect();
                *seen.lock().unwrap() = Some((task_errors, undo_errors));
                async { Ok::<(), anyhow::Error>(()) }
            },
            false,
        )
        .unwrap();
    }

    expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    let (task_errors, undo_errors) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(task_errors, vec!["fail".to_string()]);
    assert_eq!(undo_errors, vec!["t2".to_string()]);
}

#[tokio::test]
async fn compensation_receives_the_task_arguments() {
    init_tracing();
    let seen: Arc<Mutex<Vec<(String, i64, Vec<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 2);
    for h in &handles[..2] {
        let seen = Arc::clone(&seen);
        ctl.set_undo(
            *h,
            move |undo: UndoArgs<i64, i64>| {
                let mut upstream: Vec<String> = undo.args.upstream.keys().cloned().collect();
                upstream.sort();
                seen.lock()
                    .unwrap()
                    .push((undo.args.name.clone(), undo.args.bound, upstream));
                async { Ok::<(), anyhow::Error>(()) }
            },
            false,
        )
        .unwrap();
    }

    expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("t1".to_string(), 1, vec!["t0".to_string()]),
            ("t0".to_string(), 1, vec![]),
        ]
    );
}

#[tokio::test]
async fn aborted_error_renders_every_section_in_order() {
    init_tracing();
    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 2);
    ctl.set_undo(handles[1], recording_undo(NameLog::new(), true), false)
        .unwrap();
    let waiter = ctl.add_task("waiter", cancel_aware_task, 0);
    ctl.set_undo(waiter, recording_undo(NameLog::new(), false), false)
        .unwrap();

    let err = with_timeout(ctl.run()).await.unwrap_err();
    let rendered = err.to_string();

    let task_pos = rendered.find("[x] TaskErrors:").unwrap();
    let undo_pos = rendered.find("[-] UndoErrors:").unwrap();
    let cancel_pos = rendered.find("[/] Cancelled:").unwrap();
    assert!(task_pos < undo_pos && undo_pos < cancel_pos);

    assert!(rendered.contains("fail: fail failed"));
    assert!(rendered.contains("t1: undo of t1 failed"));
    assert!(rendered.contains("waiter: waiter stopped at step 1"));
}

#[tokio::test]
async fn state_is_clean_for_the_next_run_after_rollback() {
    init_tracing();
    let undone = NameLog::new();
    let mut ctl = SumController::new();
    let handles = chain_then_failure(&mut ctl, 3);
    for h in &handles {
        ctl.set_undo(*h, recording_undo(undone.clone(), false), false)
            .unwrap();
    }

    let first = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());
    let second = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());

    // Nothing from the first run leaks into the second.
    assert_eq!(first.task_errors.len(), 1);
    assert_eq!(second.task_errors.len(), 1);
    assert_eq!(undone.entries(), names([2, 1, 0, 2, 1, 0].into_iter()));
}

#[tokio::test]
async fn dropped_run_leaves_nothing_for_the_next_rollback() {
    init_tracing();
    let undone = NameLog::new();
    let ran = NameLog::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut ctl = SumController::new();

    // First call succeeds slowly, every later call fails.
    let a = {
        let calls = Arc::clone(&calls);
        ctl.add_task(
            "A",
            move |args: TaskArgs<i64, i64>| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(args.bound)
                    } else {
                        Err(TaskError::fatal(anyhow!("{} failed", args.name)))
                    }
                }
            },
            1,
        )
    };
    let b = ctl.add_task("B", logged_sum_task(ran.clone()), 2);
    depend_on_all(&mut ctl, b, &[a]);
    terminate_on_all(&mut ctl, &[b]);
    for h in [a, b] {
        ctl.set_undo(h, recording_undo(undone.clone(), false), false)
            .unwrap();
    }

    let first = tokio::time::timeout(Duration::from_millis(10), ctl.run()).await;
    assert!(first.is_err(), "first run should still be in flight");
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The dropped run was cancelled: B never ran.
    assert!(ran.is_empty());

    let aborted = expect_aborted(with_timeout(ctl.run()).await.unwrap_err());
    assert_eq!(aborted.failed_tasks().collect::<Vec<_>>(), vec!["A"]);
    assert!(undone.is_empty(), "compensated {:?}", undone.entries());
}
