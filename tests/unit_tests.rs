//! Unit tests for core kernel data structures
//!
//! These exercise the pure pieces (priority bitmap, errors, types,
//! configuration, time conversion) without running the scheduler.

mod prio_tests {
    use satos::config::MAX_PRIORITY_LEVELS;
    use satos::prio::PrioTable;

    #[test]
    fn test_empty_table() {
        let table = PrioTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_highest(), None);
    }

    #[test]
    fn test_single_priority() {
        let mut table = PrioTable::new();

        table.insert(5);
        assert!(!table.is_empty());
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.get_highest(), Some(5));

        table.remove(5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_multiple_priorities() {
        let mut table = PrioTable::new();

        // Insert in random order
        table.insert(12);
        table.insert(5);
        table.insert(10);
        table.insert(0);
        table.insert(15);

        // Highest (lowest number) should be 0
        assert_eq!(table.get_highest(), Some(0));

        // Remove in order
        table.remove(0);
        assert_eq!(table.get_highest(), Some(5));

        table.remove(5);
        assert_eq!(table.get_highest(), Some(10));

        table.remove(10);
        assert_eq!(table.get_highest(), Some(12));

        table.remove(12);
        assert_eq!(table.get_highest(), Some(15));

        table.remove(15);
        assert!(table.is_empty());
    }

    #[test]
    fn test_all_priorities() {
        let mut table = PrioTable::new();

        for i in 0..MAX_PRIORITY_LEVELS {
            table.insert(i as u8);
        }
        assert_eq!(table.get_highest(), Some(0));

        for i in 0..MAX_PRIORITY_LEVELS {
            assert_eq!(table.get_highest(), Some(i as u8));
            table.remove(i as u8);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_remove() {
        let mut table = PrioTable::new();

        // Insert same priority twice
        table.insert(10);
        table.insert(10);
        assert_eq!(table.get_highest(), Some(10));

        // First remove clears the bit; occupancy is not refcounted
        table.remove(10);
        assert!(table.is_empty());
    }
}

mod error_tests {
    use satos::error::OsError;

    #[test]
    fn test_error_variants() {
        assert_eq!(OsError::Timeout, OsError::Timeout);
        assert_ne!(OsError::Timeout, OsError::ObjDeleted);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(OsError::Timeout.to_string(), "timed out");
        assert_eq!(OsError::MutexNotOwner.to_string(), "mutex not owned by caller");
        let _ = format!("{:?}", OsError::SchedLocked);
    }
}

mod types_tests {
    use satos::types::*;

    #[test]
    fn test_task_state_enum() {
        let state = TaskState::Ready;
        assert_eq!(state, TaskState::Ready);
        assert_ne!(state, TaskState::Blocked);
        assert_eq!(TaskState::Terminated.as_str(), "TERMINATED");
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(Policy::Priority.as_str(), "Priority");
        assert_eq!(Policy::RoundRobin.as_str(), "Round Robin");
        assert_eq!(Policy::Edf.as_str(), "Earliest Deadline First");
        assert_eq!(Policy::Rms.as_str(), "Rate Monotonic");
    }

    #[test]
    fn test_event_option_bits() {
        // The option bits must be distinct and combinable
        assert_ne!(evt::WAIT_ALL, evt::WAIT_ANY);
        assert_eq!(evt::WAIT_ALL & evt::CLEAR, 0);
        let combined = evt::WAIT_ALL | evt::CLEAR;
        assert_ne!(combined & evt::WAIT_ALL, 0);
        assert_ne!(combined & evt::CLEAR, 0);
    }
}

mod config_tests {
    use satos::config::*;

    #[test]
    fn test_config_values() {
        assert!(MAX_PRIORITY_LEVELS >= 8, "need at least 8 priority levels");
        assert!(MAX_PRIORITY_LEVELS <= 32, "bitmap is a single word");

        assert!(MAX_TASKS >= 8);
        assert!(SYSTEM_TICK_MS > 0);
        assert!(DEFAULT_TIME_SLICE > 0);
        assert_eq!(MAX_TIMEOUT, u32::MAX);

        // Idle priority should be lowest
        assert_eq!(IDLE_PRIORITY, (MAX_PRIORITY_LEVELS - 1) as u8);
    }
}

mod time_tests {
    use satos::{Kernel, OsError, Policy};

    #[test]
    fn test_tick_conversions() {
        let kernel = Kernel::new(Policy::Priority).unwrap();
        assert_eq!(kernel.tick_rate_ms(), 10);
        assert_eq!(kernel.ms_to_ticks(100), 10);
        assert_eq!(kernel.ticks_to_ms(10), 100);

        kernel.set_tick_rate(5).unwrap();
        assert_eq!(kernel.ms_to_ticks(100), 20);
        assert!(matches!(kernel.set_tick_rate(0), Err(OsError::InvalidArg)));

        kernel.shutdown();
    }

    #[test]
    fn test_tick_counts_without_scheduler() {
        let kernel = Kernel::new(Policy::Priority).unwrap();
        assert_eq!(kernel.now(), 0);
        kernel.tick();
        kernel.tick();
        assert_eq!(kernel.now(), 2);
        kernel.shutdown();
    }
}
