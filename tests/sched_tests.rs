//! Scheduler integration tests
//!
//! Tasks drive the tick themselves, so logical time advances in lock-step
//! with execution and every scenario is deterministic. A test ends when
//! one of its tasks calls `stop()`; `start()` then returns and the
//! assertions run on the main thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use satos::{
    Kernel, OsError, Policy, SchedulerState, TaskState, MAX_PRIORITY_LEVELS, MAX_TASKS,
};

fn init_kernel(policy: Policy) -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::new(policy).expect("kernel init failed")
}

/// Bounded tick-driving task body; stops the kernel if the scenario runs
/// away instead of hanging the test.
fn ticker(kernel: Kernel) -> impl FnOnce() + Send + 'static {
    move || {
        for _ in 0..10_000 {
            if !kernel.is_running() {
                return;
            }
            kernel.tick();
        }
        let _ = kernel.stop();
    }
}

#[test]
fn priority_policy_runs_highest_only() {
    let kernel = init_kernel(Policy::Priority);
    let high_runs = Arc::new(AtomicU32::new(0));
    let lower_ran = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    let runs = high_runs.clone();
    kernel
        .task_create("a", 1, 2048, move || {
            for _ in 0..5 {
                runs.fetch_add(1, Ordering::Relaxed);
                k.task_yield();
            }
            k.stop().unwrap();
        })
        .unwrap();

    for (name, prio) in [("b", 2u8), ("c", 3u8)] {
        let flag = lower_ran.clone();
        kernel
            .task_create(name, prio, 2048, move || {
                flag.store(true, Ordering::Relaxed);
            })
            .unwrap();
    }

    kernel.start().unwrap();
    assert_eq!(high_runs.load(Ordering::Relaxed), 5);
    assert!(!lower_ran.load(Ordering::Relaxed));
    kernel.shutdown();
}

#[test]
fn round_robin_splits_ticks_evenly() {
    let kernel = init_kernel(Policy::RoundRobin);
    let counts: Arc<[AtomicU32; 3]> =
        Arc::new([AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)]);

    for i in 0..3 {
        let k = kernel.clone();
        let counts = counts.clone();
        kernel
            .task_create(&format!("worker{}", i), 1, 2048, move || {
                while k.now() < 30 {
                    counts[i].fetch_add(1, Ordering::Relaxed);
                    k.tick();
                }
                let _ = k.stop();
            })
            .unwrap();
    }

    kernel.start().unwrap();
    // Default slice of 10 ticks: each worker accumulates exactly one
    // slice over 30 ticks.
    for i in 0..3 {
        assert_eq!(counts[i].load(Ordering::Relaxed), 10, "worker{}", i);
    }
    kernel.shutdown();
}

#[test]
fn delay_wakes_exactly_on_time() {
    let kernel = init_kernel(Policy::Priority);
    let woke_at = Arc::new(AtomicU32::new(u32::MAX));

    let k = kernel.clone();
    let woke = woke_at.clone();
    kernel
        .task_create("sleeper", 1, 2048, move || {
            k.task_delay(0).unwrap(); // equivalent to a yield
            k.task_delay(5).unwrap();
            woke.store(k.now(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();
    kernel.task_create("ticker", 2, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    assert_eq!(woke_at.load(Ordering::Relaxed), 5);
    kernel.shutdown();
}

#[test]
fn delay_until_past_is_a_yield() {
    let kernel = init_kernel(Policy::Priority);
    let done = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    let flag = done.clone();
    kernel
        .task_create("sleeper", 1, 2048, move || {
            k.tick();
            k.tick();
            // Target in the past: must not block.
            k.task_delay_until(1).unwrap();
            flag.store(true, Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert!(done.load(Ordering::Relaxed));
    kernel.shutdown();
}

#[test]
fn task_lifecycle_and_registry() {
    let kernel = init_kernel(Policy::Priority);
    assert_eq!(kernel.task_count(), 1); // idle

    let t = kernel.task_create("worker", 5, 2048, || {}).unwrap();
    assert_eq!(kernel.task_state(t).unwrap(), TaskState::Ready);
    assert_eq!(kernel.task_priority(t).unwrap(), 5);
    assert_eq!(kernel.task_by_name("worker"), Some(t));
    assert_eq!(kernel.task_count(), 2);

    kernel.task_suspend(t).unwrap();
    assert_eq!(kernel.task_state(t).unwrap(), TaskState::Suspended);
    kernel.task_resume(t).unwrap();
    assert_eq!(kernel.task_state(t).unwrap(), TaskState::Ready);
    // Resuming a non-suspended task is a warned no-op.
    kernel.task_resume(t).unwrap();

    kernel.task_set_priority(t, 2).unwrap();
    assert_eq!(kernel.task_priority(t).unwrap(), 2);
    assert!(matches!(
        kernel.task_set_priority(t, MAX_PRIORITY_LEVELS as u8),
        Err(OsError::PrioInvalid)
    ));

    let idle = kernel.task_by_name("idle").unwrap();
    assert!(matches!(kernel.task_delete(idle), Err(OsError::TaskIsIdle)));
    assert!(matches!(kernel.task_suspend(idle), Err(OsError::TaskIsIdle)));

    kernel.task_delete(t).unwrap();
    assert!(kernel.task_state(t).is_err());
    assert_eq!(kernel.task_count(), 1);

    // Names are truncated to the configured maximum.
    let long = kernel
        .task_create("a-very-long-task-name-indeed", 4, 2048, || {})
        .unwrap();
    assert_eq!(kernel.task_name(long).unwrap().len(), 15);

    kernel.shutdown();
}

#[test]
fn registry_capacity_enforced() {
    let kernel = init_kernel(Policy::Priority);
    for i in 0..(MAX_TASKS - 1) {
        kernel
            .task_create(&format!("t{}", i), 5, 2048, || {})
            .unwrap();
    }
    assert!(matches!(
        kernel.task_create("overflow", 5, 2048, || {}),
        Err(OsError::TaskLimit)
    ));
    assert!(matches!(
        kernel.task_create("badprio", MAX_PRIORITY_LEVELS as u8, 2048, || {}),
        Err(OsError::PrioInvalid)
    ));
    assert!(matches!(
        kernel.task_create("", 5, 2048, || {}),
        Err(OsError::InvalidArg)
    ));
    kernel.shutdown();
}

#[test]
fn periodic_release_times() {
    let kernel = init_kernel(Policy::Priority);
    let wakes = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let w = wakes.clone();
    let p = kernel
        .task_create("periodic", 1, 2048, move || {
            loop {
                w.lock().unwrap().push(k.now());
                if k.now() >= 150 {
                    break;
                }
                // Long delay; each periodic release wakes us early.
                if k.task_delay(1000).is_err() {
                    return;
                }
            }
            let _ = k.stop();
        })
        .unwrap();
    kernel.task_set_periodic(p, 50, 0).unwrap();
    kernel.task_create("ticker", 2, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    assert_eq!(*wakes.lock().unwrap(), vec![0, 50, 100, 150]);
    assert_eq!(kernel.task_stats(p).unwrap().deadline_misses, 0);
    kernel.shutdown();
}

#[test]
fn deadline_miss_counted_once_per_job() {
    let kernel = init_kernel(Policy::Priority);

    let k = kernel.clone();
    let p = kernel
        .task_create("busy", 1, 2048, move || {
            // Never completes a job: stays runnable straight through its
            // deadline at tick 90.
            while k.now() < 100 {
                k.tick();
            }
            let _ = k.stop();
        })
        .unwrap();
    kernel.task_set_periodic(p, 50, 40).unwrap();

    kernel.start().unwrap();
    assert_eq!(kernel.task_stats(p).unwrap().deadline_misses, 1);
    assert_eq!(kernel.stats().deadline_misses, 1);
    kernel.shutdown();
}

#[test]
fn check_deadlines_reports_overdue_tasks() {
    let kernel = init_kernel(Policy::Priority);
    let overdue = Arc::new(AtomicU32::new(u32::MAX));

    let k = kernel.clone();
    let o = overdue.clone();
    let p = kernel
        .task_create("busy", 1, 2048, move || {
            while k.now() < 95 {
                k.tick();
            }
            // Deadline was tick 90; at tick 95 this task is overdue.
            o.store(k.check_deadlines(), Ordering::Relaxed);
            let _ = k.stop();
        })
        .unwrap();
    kernel.task_set_periodic(p, 50, 40).unwrap();

    kernel.start().unwrap();
    assert_eq!(overdue.load(Ordering::Relaxed), 1);
    kernel.shutdown();
}

#[test]
fn edf_selects_earliest_deadline() {
    let kernel = init_kernel(Policy::Edf);
    let order = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let o = order.clone();
    let late = kernel
        .task_create("late", 1, 2048, move || {
            o.lock().unwrap().push("late");
            let _ = k.stop();
        })
        .unwrap();

    let k = kernel.clone();
    let o = order.clone();
    let early = kernel
        .task_create("early", 5, 2048, move || {
            o.lock().unwrap().push("early");
            k.task_yield();
        })
        .unwrap();

    // "late" sits in a higher priority class but has the later deadline.
    kernel.task_set_periodic(late, 200, 0).unwrap();
    kernel.task_set_periodic(early, 100, 0).unwrap();

    kernel.start().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
    kernel.shutdown();
}

#[test]
fn scheduler_lock_defers_switch() {
    let kernel = init_kernel(Policy::Priority);
    let sem = kernel.create_semaphore("gate", 0, 1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let delay_refused = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    let s = sem.clone();
    let o = order.clone();
    kernel
        .task_create("high", 0, 2048, move || {
            s.take(satos::MAX_TIMEOUT).unwrap();
            o.lock().unwrap().push("high-awake");
            k.stop().unwrap();
        })
        .unwrap();

    let k = kernel.clone();
    let o = order.clone();
    let refused = delay_refused.clone();
    kernel
        .task_create("low", 1, 2048, move || {
            k.sched_lock().unwrap();
            sem.give().unwrap(); // high is ready, but the switch is deferred
            o.lock().unwrap().push("low-still-running");
            refused.store(
                matches!(k.task_delay(1), Err(OsError::SchedLocked)),
                Ordering::Relaxed,
            );
            k.sched_unlock().unwrap(); // high preempts here
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["low-still-running", "high-awake"]);
    assert!(delay_refused.load(Ordering::Relaxed));
    kernel.shutdown();
}

#[test]
fn suspend_self_and_resume() {
    let kernel = init_kernel(Policy::Priority);
    let phases = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let p = phases.clone();
    let worker = kernel
        .task_create("worker", 1, 2048, move || {
            p.lock().unwrap().push("first");
            let me = k.current_task().unwrap();
            k.task_suspend(me).unwrap();
            p.lock().unwrap().push("second");
            k.stop().unwrap();
        })
        .unwrap();

    let k = kernel.clone();
    let p = phases.clone();
    kernel
        .task_create("controller", 2, 2048, move || {
            let observed = if k.task_state(worker).unwrap() == TaskState::Suspended {
                "suspended"
            } else {
                "not-suspended"
            };
            p.lock().unwrap().push(observed);
            k.task_resume(worker).unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*phases.lock().unwrap(), vec!["first", "suspended", "second"]);
    kernel.shutdown();
}

#[test]
fn panicking_task_terminates() {
    let kernel = init_kernel(Policy::Priority);

    let crasher = kernel
        .task_create("crasher", 1, 2048, || panic!("boom"))
        .unwrap();
    let k = kernel.clone();
    kernel
        .task_create("survivor", 2, 2048, move || {
            let _ = k.stop();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(kernel.task_state(crasher).unwrap(), TaskState::Terminated);
    kernel.shutdown();
}

#[test]
fn scheduler_stats_accumulate() {
    let kernel = init_kernel(Policy::Priority);

    let k = kernel.clone();
    kernel
        .task_create("sleeper", 1, 2048, move || {
            for _ in 0..5 {
                if k.task_delay(2).is_err() {
                    return;
                }
            }
            let _ = k.stop();
        })
        .unwrap();
    kernel.task_create("ticker", 2, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    let stats = kernel.stats();
    assert_eq!(stats.system_time, 10);
    assert!(stats.context_switches >= 10);
    assert_eq!(stats.tasks_created, 3); // idle + sleeper + ticker
    assert!((stats.cpu_load - 1.0).abs() < f32::EPSILON); // idle never ran

    kernel.reset_stats();
    let stats = kernel.stats();
    assert_eq!(stats.system_time, 10);
    assert_eq!(stats.tasks_created, 3);
    assert_eq!(stats.context_switches, 0);
    kernel.shutdown();
}

#[test]
fn start_stop_lifecycle() {
    let kernel = init_kernel(Policy::Priority);
    assert_eq!(kernel.state(), SchedulerState::Stopped);
    assert!(!kernel.is_running());

    let k = kernel.clone();
    kernel
        .task_create("stopper", 1, 2048, move || {
            k.stop().unwrap();
            // A second stop is a warned no-op.
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(kernel.state(), SchedulerState::Stopped);
    assert!(!kernel.is_running());

    kernel.shutdown();
    assert_eq!(kernel.task_count(), 0);
}

#[test]
fn policy_can_be_changed() {
    let kernel = init_kernel(Policy::Priority);
    assert_eq!(kernel.policy(), Policy::Priority);
    kernel.set_policy(Policy::Rms);
    assert_eq!(kernel.policy(), Policy::Rms);
    kernel.shutdown();
}
