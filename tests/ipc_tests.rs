//! IPC integration tests
//!
//! Semaphore, mutex, queue, and event group scenarios. As in the
//! scheduler tests, tasks drive the tick themselves so every interleaving
//! is deterministic; results are recorded into shared cells and asserted
//! on the main thread after `start()` returns.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use satos::{evt, Kernel, OsError, Policy, TaskState, MAX_SEMAPHORES, MAX_TIMEOUT};

fn init_kernel(policy: Policy) -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::new(policy).expect("kernel init failed")
}

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

// ============ Semaphores ============

#[test]
fn semaphore_signal_before_timeout() {
    let kernel = init_kernel(Policy::Priority);
    let sem = kernel.create_semaphore("sem", 0, 1).unwrap();
    let woke_at = Arc::new(AtomicU32::new(u32::MAX));
    let take_ok = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    let s = sem.clone();
    let woke = woke_at.clone();
    let ok = take_ok.clone();
    kernel
        .task_create("taker", 1, 2048, move || {
            ok.store(s.take(5).is_ok(), Ordering::Relaxed);
            woke.store(k.now(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();

    let k = kernel.clone();
    let s = sem.clone();
    kernel
        .task_create("giver", 2, 2048, move || {
            for _ in 0..3 {
                k.tick();
            }
            s.give().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert!(take_ok.load(Ordering::Relaxed));
    assert_eq!(woke_at.load(Ordering::Relaxed), 3);
    // Give-to-waiter cancels against the take: the count stays 0.
    assert_eq!(sem.count().unwrap(), 0);
    kernel.shutdown();
}

#[test]
fn semaphore_take_times_out() {
    let kernel = init_kernel(Policy::Priority);
    let sem = kernel.create_semaphore("sem", 0, 1).unwrap();
    let result = Arc::new(Mutex::new(None));
    let woke_at = Arc::new(AtomicU32::new(u32::MAX));

    let k = kernel.clone();
    let s = sem.clone();
    let res = result.clone();
    let woke = woke_at.clone();
    kernel
        .task_create("taker", 1, 2048, move || {
            *res.lock().unwrap() = Some(s.take(5));
            woke.store(k.now(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();
    kernel.task_create("ticker", 2, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(Err(OsError::Timeout)));
    assert_eq!(woke_at.load(Ordering::Relaxed), 5);
    // The timed-out waiter left the list: a give now just increments.
    sem.give().unwrap();
    assert_eq!(sem.count().unwrap(), 1);
    kernel.shutdown();
}

#[test]
fn semaphore_give_at_max_fails() {
    let kernel = init_kernel(Policy::Priority);
    let sem = kernel.create_semaphore("sem", 1, 1).unwrap();
    assert!(matches!(sem.give(), Err(OsError::SemOverflow)));
    assert_eq!(sem.count().unwrap(), 1);
    kernel.shutdown();
}

#[test]
fn semaphore_wakes_waiters_fifo() {
    let kernel = init_kernel(Policy::Priority);
    let sem = kernel.create_semaphore("sem", 0, 3).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let s = sem.clone();
        let o = order.clone();
        kernel
            .task_create(name, 2, 2048, move || {
                if s.take(MAX_TIMEOUT).is_ok() {
                    o.lock().unwrap().push(name);
                }
            })
            .unwrap();
    }

    let k = kernel.clone();
    kernel
        .task_create("giver", 3, 2048, move || {
            for _ in 0..3 {
                sem.give().unwrap();
            }
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    kernel.shutdown();
}

#[test]
fn semaphore_delete_wakes_waiters_with_error() {
    let kernel = init_kernel(Policy::Priority);
    let sem = kernel.create_semaphore("sem", 0, 1).unwrap();
    let result = Arc::new(Mutex::new(None));

    let k = kernel.clone();
    let s = sem.clone();
    let res = result.clone();
    kernel
        .task_create("waiter", 1, 2048, move || {
            *res.lock().unwrap() = Some(s.take(MAX_TIMEOUT));
            k.stop().unwrap();
        })
        .unwrap();

    let s = sem.clone();
    kernel
        .task_create("deleter", 2, 2048, move || {
            s.delete().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(Err(OsError::ObjDeleted)));
    // The handle is stale now.
    assert!(matches!(sem.take(0), Err(OsError::ObjInvalid)));
    kernel.shutdown();
}

#[test]
fn ipc_pool_capacity() {
    let kernel = init_kernel(Policy::Priority);
    let mut sems = Vec::new();
    for i in 0..MAX_SEMAPHORES {
        sems.push(kernel.create_semaphore(&format!("s{}", i), 0, 1).unwrap());
    }
    assert!(matches!(
        kernel.create_semaphore("overflow", 0, 1),
        Err(OsError::ObjLimit)
    ));
    // Mutex pool is independent of the semaphore pool.
    kernel.create_mutex("m").unwrap();
    // Constructor validation.
    assert!(matches!(
        kernel.create_queue("q", 0, 4),
        Err(OsError::InvalidArg)
    ));
    assert!(matches!(
        kernel.create_semaphore("bad", 2, 1),
        Err(OsError::InvalidArg)
    ));
    kernel.shutdown();
}

// ============ Mutexes ============

#[test]
fn mutex_priority_inheritance() {
    let kernel = init_kernel(Policy::Priority);
    let mutex = kernel.create_mutex("m").unwrap();
    let gate = kernel.create_semaphore("gate", 0, 1).unwrap();
    let boosted = Arc::new(AtomicU8::new(0xFF));
    let restored = Arc::new(AtomicU8::new(0xFF));

    let k = kernel.clone();
    let m = mutex.clone();
    let g = gate.clone();
    let b = boosted.clone();
    let low = kernel
        .task_create("low", 5, 2048, move || {
            m.lock(MAX_TIMEOUT).unwrap();
            g.give().unwrap(); // high wakes, contends, boosts us
            let me = k.current_task().unwrap();
            b.store(k.task_priority(me).unwrap(), Ordering::Relaxed);
            m.unlock().unwrap();
        })
        .unwrap();

    let k = kernel.clone();
    let m = mutex.clone();
    let r = restored.clone();
    kernel
        .task_create("high", 1, 2048, move || {
            gate.take(MAX_TIMEOUT).unwrap();
            m.lock(MAX_TIMEOUT).unwrap(); // direct hand-off from low
            r.store(k.task_priority(low).unwrap(), Ordering::Relaxed);
            m.unlock().unwrap();
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    // While high waited, low ran at high's priority.
    assert_eq!(boosted.load(Ordering::Relaxed), 1);
    // After unlock, low is back at its original priority.
    assert_eq!(restored.load(Ordering::Relaxed), 5);
    kernel.shutdown();
}

#[test]
fn mutex_handoff_highest_priority_waiter() {
    let kernel = init_kernel(Policy::Priority);
    let mutex = kernel.create_mutex("m").unwrap();
    let gate1 = kernel.create_semaphore("g1", 0, 1).unwrap();
    let gate2 = kernel.create_semaphore("g2", 0, 1).unwrap();
    let park = kernel.create_semaphore("park", 0, 1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let m = mutex.clone();
    let g1 = gate1.clone();
    let g2 = gate2.clone();
    kernel
        .task_create("owner", 3, 2048, move || {
            m.lock(MAX_TIMEOUT).unwrap();
            g1.give().unwrap(); // mid-priority waiter queues up
            g2.give().unwrap(); // high-priority waiter queues up
            m.unlock().unwrap(); // must hand off to the high waiter
        })
        .unwrap();

    let m = mutex.clone();
    let o = order.clone();
    let k = kernel.clone();
    kernel
        .task_create("mid", 2, 2048, move || {
            gate1.take(MAX_TIMEOUT).unwrap();
            m.lock(MAX_TIMEOUT).unwrap();
            o.lock().unwrap().push("mid");
            m.unlock().unwrap();
            k.stop().unwrap();
        })
        .unwrap();

    let m = mutex.clone();
    let o = order.clone();
    kernel
        .task_create("high", 1, 2048, move || {
            gate2.take(MAX_TIMEOUT).unwrap();
            m.lock(MAX_TIMEOUT).unwrap();
            o.lock().unwrap().push("high");
            m.unlock().unwrap();
            park.take(MAX_TIMEOUT).unwrap(); // stay out of the way
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["high", "mid"]);
    kernel.shutdown();
}

#[test]
fn mutex_protocol_errors() {
    let kernel = init_kernel(Policy::Priority);
    let mutex = kernel.create_mutex("m").unwrap();
    let results = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let m = mutex.clone();
    let res = results.clone();
    kernel
        .task_create("t", 1, 2048, move || {
            let mut r = res.lock().unwrap();
            r.push(("lock", m.lock(0).is_ok()));
            r.push(("relock", matches!(m.lock(0), Err(OsError::MutexOwner))));
            r.push(("locked", m.is_locked().unwrap()));
            r.push(("unlock", m.unlock().is_ok()));
            r.push(("reunlock", matches!(m.unlock(), Err(OsError::MutexNotOwner))));
            drop(r);
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    for (what, ok) in results.lock().unwrap().iter() {
        assert!(*ok, "{} failed", what);
    }
    kernel.shutdown();
}

#[test]
fn mutex_lock_times_out_and_self_removes() {
    let kernel = init_kernel(Policy::Priority);
    let mutex = kernel.create_mutex("m").unwrap();
    let result = Arc::new(Mutex::new(None));
    let unlocked_clean = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    let m = mutex.clone();
    let clean = unlocked_clean.clone();
    kernel
        .task_create("owner", 1, 2048, move || {
            m.lock(MAX_TIMEOUT).unwrap();
            if k.task_delay(10).is_err() {
                return;
            }
            m.unlock().unwrap();
            // No waiter was left behind by the timed-out contender.
            clean.store(!m.is_locked().unwrap(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();

    let m = mutex.clone();
    let res = result.clone();
    kernel
        .task_create("contender", 2, 2048, move || {
            *res.lock().unwrap() = Some(m.lock(3));
        })
        .unwrap();
    kernel.task_create("ticker", 3, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(Err(OsError::Timeout)));
    assert!(unlocked_clean.load(Ordering::Relaxed));
    kernel.shutdown();
}

// ============ Queues ============

#[test]
fn queue_blocking_send_preserves_order() {
    let kernel = init_kernel(Policy::Priority);
    let queue = kernel.create_queue("q", 4, 2).unwrap();
    let got = Arc::new(Mutex::new(Vec::new()));
    let sent_all = Arc::new(AtomicBool::new(false));

    let q = queue.clone();
    let sent = sent_all.clone();
    kernel
        .task_create("producer", 1, 2048, move || {
            q.send(&0x11u32.to_le_bytes(), 0).unwrap();
            q.send(&0x22u32.to_le_bytes(), 0).unwrap();
            // Queue is full: this blocks until the consumer drains a slot.
            q.send(&0x33u32.to_le_bytes(), MAX_TIMEOUT).unwrap();
            sent.store(true, Ordering::Relaxed);
        })
        .unwrap();

    let k = kernel.clone();
    let q = queue.clone();
    let g = got.clone();
    kernel
        .task_create("consumer", 2, 2048, move || {
            let mut buf = [0u8; 4];
            for _ in 0..3 {
                q.receive(&mut buf, MAX_TIMEOUT).unwrap();
                g.lock().unwrap().push(u32::from_le_bytes(buf));
            }
            let empty = matches!(q.receive(&mut buf, 0), Err(OsError::Timeout));
            g.lock().unwrap().push(if empty { 1 } else { 0 });
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*got.lock().unwrap(), vec![0x11, 0x22, 0x33, 1]);
    assert!(sent_all.load(Ordering::Relaxed));
    assert_eq!(queue.count().unwrap(), 0);
    kernel.shutdown();
}

#[test]
fn queue_rendezvous_on_empty() {
    let kernel = init_kernel(Policy::Priority);
    let queue = kernel.create_queue("q", 4, 2).unwrap();
    let got = Arc::new(AtomicU32::new(0));

    let k = kernel.clone();
    let q = queue.clone();
    let g = got.clone();
    kernel
        .task_create("consumer", 1, 2048, move || {
            let mut buf = [0u8; 4];
            q.receive(&mut buf, MAX_TIMEOUT).unwrap();
            g.store(u32::from_le_bytes(buf), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();

    let q = queue.clone();
    kernel
        .task_create("producer", 2, 2048, move || {
            // Consumer is parked on the empty queue: direct hand-off.
            q.send(&0xAB54u32.to_le_bytes(), 0).unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(got.load(Ordering::Relaxed), 0xAB54);
    assert_eq!(queue.count().unwrap(), 0);
    kernel.shutdown();
}

#[test]
fn queue_peek_and_timeouts() {
    let kernel = init_kernel(Policy::Priority);
    let queue = kernel.create_queue("q", 4, 1).unwrap();
    let outcome = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let q = queue.clone();
    let o = outcome.clone();
    kernel
        .task_create("t", 1, 2048, move || {
            let mut buf = [0u8; 4];
            let mut o = o.lock().unwrap();
            o.push(("peek-empty", matches!(q.peek(&mut buf), Err(OsError::QueueEmpty))));
            q.send(&7u32.to_le_bytes(), 0).unwrap();
            o.push(("send-full", matches!(q.send(&8u32.to_le_bytes(), 0), Err(OsError::Timeout))));
            q.peek(&mut buf).unwrap();
            o.push(("peek", u32::from_le_bytes(buf) == 7));
            o.push(("count", q.count().unwrap() == 1));
            q.receive(&mut buf, 0).unwrap();
            o.push(("recv", u32::from_le_bytes(buf) == 7));
            o.push(("size", matches!(q.send(&[0u8; 2], 0), Err(OsError::MsgSizeInvalid))));
            drop(o);
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    for (what, ok) in outcome.lock().unwrap().iter() {
        assert!(*ok, "{} failed", what);
    }
    kernel.shutdown();
}

#[test]
fn queue_receive_times_out() {
    let kernel = init_kernel(Policy::Priority);
    let queue = kernel.create_queue("q", 4, 2).unwrap();
    let woke_at = Arc::new(AtomicU32::new(u32::MAX));
    let result = Arc::new(Mutex::new(None));

    let k = kernel.clone();
    let q = queue.clone();
    let woke = woke_at.clone();
    let res = result.clone();
    kernel
        .task_create("receiver", 1, 2048, move || {
            let mut buf = [0u8; 4];
            *res.lock().unwrap() = Some(q.receive(&mut buf, 4));
            woke.store(k.now(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();
    kernel.task_create("ticker", 2, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(Err(OsError::Timeout)));
    assert_eq!(woke_at.load(Ordering::Relaxed), 4);
    kernel.shutdown();
}

// ============ Event groups ============

#[test]
fn event_wait_all_with_clear() {
    let kernel = init_kernel(Policy::Priority);
    let group = kernel.create_event_group("g").unwrap();
    let matched = Arc::new(AtomicU32::new(0));
    let flags_after = Arc::new(AtomicU32::new(u32::MAX));
    let still_blocked = Arc::new(AtomicBool::new(false));

    let k = kernel.clone();
    let g = group.clone();
    let m = matched.clone();
    let fa = flags_after.clone();
    let waiter = kernel
        .task_create("waiter", 1, 2048, move || {
            let bits = g.wait(0b0101, evt::WAIT_ALL | evt::CLEAR, MAX_TIMEOUT).unwrap();
            m.store(bits, Ordering::Relaxed);
            fa.store(g.get_flags().unwrap(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();

    let k = kernel.clone();
    let g = group.clone();
    let blocked = still_blocked.clone();
    kernel
        .task_create("setter", 2, 2048, move || {
            g.set_flags(0b0001).unwrap();
            // Half the mask is not enough for an ALL wait.
            blocked.store(
                k.task_state(waiter).unwrap() == TaskState::Blocked,
                Ordering::Relaxed,
            );
            g.set_flags(0b0100).unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert!(still_blocked.load(Ordering::Relaxed));
    assert_eq!(matched.load(Ordering::Relaxed), 0b0101);
    assert_eq!(flags_after.load(Ordering::Relaxed), 0);
    kernel.shutdown();
}

#[test]
fn event_immediate_any_and_clear_semantics() {
    let kernel = init_kernel(Policy::Priority);
    let group = kernel.create_event_group("g").unwrap();
    let outcome = Arc::new(Mutex::new(Vec::new()));

    let k = kernel.clone();
    let g = group.clone();
    let o = outcome.clone();
    kernel
        .task_create("t", 1, 2048, move || {
            let mut o = o.lock().unwrap();
            g.set_flags(0b0010).unwrap();
            // Already satisfied: returns without blocking, no clear.
            o.push(("any", g.wait(0b0110, evt::WAIT_ANY, 0) == Ok(0b0010)));
            o.push(("kept", g.get_flags() == Ok(0b0010)));
            // Unsatisfied non-blocking wait reports a timeout.
            o.push(("miss", matches!(g.wait(0b1000, evt::WAIT_ANY, 0), Err(OsError::Timeout))));
            // clear_flags never wakes and returns the previous value.
            o.push(("clear", g.clear_flags(0b0010) == Ok(0b0010)));
            o.push(("cleared", g.get_flags() == Ok(0)));
            drop(o);
            k.stop().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    for (what, ok) in outcome.lock().unwrap().iter() {
        assert!(*ok, "{} failed", what);
    }
    kernel.shutdown();
}

#[test]
fn event_wait_times_out() {
    let kernel = init_kernel(Policy::Priority);
    let group = kernel.create_event_group("g").unwrap();
    let result = Arc::new(Mutex::new(None));
    let woke_at = Arc::new(AtomicU32::new(u32::MAX));

    let k = kernel.clone();
    let g = group.clone();
    let res = result.clone();
    let woke = woke_at.clone();
    kernel
        .task_create("waiter", 1, 2048, move || {
            *res.lock().unwrap() = Some(g.wait(0b1, evt::WAIT_ALL, 4));
            woke.store(k.now(), Ordering::Relaxed);
            k.stop().unwrap();
        })
        .unwrap();
    kernel.task_create("ticker", 2, 2048, ticker(kernel.clone())).unwrap();

    kernel.start().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(Err(OsError::Timeout)));
    assert_eq!(woke_at.load(Ordering::Relaxed), 4);
    // The group survives and the mask was never set.
    assert_eq!(group.get_flags().unwrap(), 0);
    kernel.shutdown();
}

#[test]
fn event_delete_wakes_waiters_with_error() {
    let kernel = init_kernel(Policy::Priority);
    let group = kernel.create_event_group("g").unwrap();
    let result = Arc::new(Mutex::new(None));

    let k = kernel.clone();
    let g = group.clone();
    let res = result.clone();
    kernel
        .task_create("waiter", 1, 2048, move || {
            *res.lock().unwrap() = Some(g.wait(0b1, evt::WAIT_ALL, MAX_TIMEOUT));
            k.stop().unwrap();
        })
        .unwrap();

    let g = group.clone();
    kernel
        .task_create("deleter", 2, 2048, move || {
            g.delete().unwrap();
        })
        .unwrap();

    kernel.start().unwrap();
    assert_eq!(*result.lock().unwrap(), Some(Err(OsError::ObjDeleted)));
    kernel.shutdown();
}
