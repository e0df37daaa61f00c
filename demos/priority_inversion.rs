//! Priority inversion demo - mutex priority inheritance
//!
//! Three tasks: high(2), med(5), low(8).
//! Low holds the mutex -> high blocks on it -> low inherits priority 2.

use satos::drivers::TickDriver;
use satos::{Kernel, Policy, MAX_TIMEOUT};

fn main() {
    env_logger::init();

    let kernel = Kernel::new(Policy::Priority).expect("kernel init failed");
    let mutex = kernel.create_mutex("shared").expect("mutex create failed");

    let k = kernel.clone();
    let m = mutex.clone();
    kernel
        .task_create("low", 8, 4096, move || {
            m.lock(MAX_TIMEOUT).unwrap();
            let me = k.current_task().unwrap();
            println!("[low ] acquired mutex at priority {}", k.task_priority(me).unwrap());

            // Hold the lock until the contending high task boosts us.
            while k.is_running() && k.task_priority(me).unwrap() == 8 {
                k.task_yield();
            }
            println!("[low ] inherited priority {}", k.task_priority(me).unwrap());

            m.unlock().unwrap();
            println!("[low ] released, priority back to {}", k.task_priority(me).unwrap());
        })
        .unwrap();

    let k = kernel.clone();
    kernel
        .task_create("med", 5, 4096, move || {
            while k.is_running() {
                if k.task_delay(3).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    let k = kernel.clone();
    let m = mutex.clone();
    kernel
        .task_create("high", 2, 4096, move || {
            k.task_delay(2).unwrap();
            println!("[high] requesting mutex");
            m.lock(MAX_TIMEOUT).unwrap();
            println!("[high] got mutex");
            m.unlock().unwrap();
            k.stop().unwrap();
        })
        .unwrap();

    let driver = TickDriver::start(kernel.clone()).expect("tick driver failed");
    kernel.start().expect("scheduler start failed");
    driver.stop();
    kernel.shutdown();
}
