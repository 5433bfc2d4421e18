#![forbid(unsafe_code)]

//! Cross-thread validation: validators run on a worker pool and results are
//! applied either on the owning thread (through a drained queue) or directly
//! on the worker that produced them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cval_core::{Observable, QueueExecutor, ThreadExecutor, WorkerPool};
use cval_validation::{Constraint, HelperConfig, ValidationHelper, ValidationResult};

const DEADLINE: Duration = Duration::from_secs(10);

fn wait_until(mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for validation");
        thread::sleep(Duration::from_millis(1));
    }
}

fn even(pool: &Arc<WorkerPool>) -> Constraint<u32, String> {
    Constraint::validate_async(
        |n: &u32| {
            thread::sleep(Duration::from_micros(u64::from(n % 7) * 100));
            if n % 2 == 0 {
                ValidationResult::VALID
            } else {
                ValidationResult::error(format!("{n} is odd"))
            }
        },
        pool.clone(),
    )
}

#[test]
fn owning_thread_applies_results() {
    let pool = Arc::new(WorkerPool::new(4, "cval-test").unwrap());
    let completions = QueueExecutor::new();
    let value = Observable::new(0u32);
    let config = HelperConfig::default()
        .with_completion_executor(Arc::new(completions.clone()))
        .with_trace(true);
    let helper = ValidationHelper::with_config(&value, [even(&pool)], config);

    for n in 1..=25 {
        value.set(n);
    }

    wait_until(|| {
        completions.run_pending();
        !helper.is_validating()
    });

    assert!(helper.is_invalid());
    assert_eq!(helper.errors(), vec!["25 is odd".to_string()]);
    assert_eq!(helper.constrained_value(), None);
    assert!(helper.verify_trace().is_ok());
}

#[test]
fn worker_threads_apply_results() {
    let pool = Arc::new(WorkerPool::new(4, "cval-test").unwrap());
    let value = Observable::new(1u32);
    let helper = ValidationHelper::with_config(
        &value,
        [even(&pool)],
        HelperConfig::default().with_trace(true),
    );

    for n in 2..=40 {
        value.set(n);
    }

    wait_until(|| !helper.is_validating());
    assert!(helper.is_valid());
    assert!(helper.errors().is_empty());
    assert_eq!(helper.constrained_value(), Some(40));
    assert!(helper.verify_trace().is_ok());
}

#[test]
fn thread_executor_runs_validator_off_thread() {
    let caller = thread::current().id();
    let off_thread = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&off_thread);
    let value = Observable::new(String::from("hello"));
    let constraint = Constraint::<String, ()>::validate_async(
        move |s| {
            if thread::current().id() != caller {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            ValidationResult::from_bool(!s.is_empty())
        },
        Arc::new(ThreadExecutor::new("cval-validator")),
    );
    let helper = ValidationHelper::new(&value, [constraint]);

    wait_until(|| !helper.is_validating());
    assert!(helper.is_valid());
    assert_eq!(off_thread.load(Ordering::SeqCst), 1);
}

#[test]
fn helper_handles_are_shareable_across_threads() {
    let pool = Arc::new(WorkerPool::new(2, "cval-test").unwrap());
    let value = Observable::new(0u32);
    let helper = ValidationHelper::new(&value, [even(&pool)]);

    let writers: Vec<_> = (0..4u32)
        .map(|t| {
            let value = value.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    value.set(t * 100 + i * 2);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let reader = helper.clone();
    wait_until(move || !reader.is_validating());
    assert!(helper.is_valid());
    assert_eq!(helper.constrained_value(), Some(value.get()));
}
