//! Producer/consumer demo - bounded queue hand-off
//!
//! A producer pushes numbered jobs through a 4-slot queue; a
//! higher-priority consumer drains them as they arrive.

use satos::drivers::TickDriver;
use satos::{Kernel, Policy, MAX_TIMEOUT};

const JOBS: u32 = 8;

fn main() {
    env_logger::init();

    let kernel = Kernel::new(Policy::Priority).expect("kernel init failed");
    let queue = kernel.create_queue("jobs", 4, 4).expect("queue create failed");

    let k = kernel.clone();
    let q = queue.clone();
    kernel
        .task_create("producer", 4, 4096, move || {
            for job in 0..JOBS {
                if q.send(&job.to_le_bytes(), MAX_TIMEOUT).is_err() {
                    break;
                }
                println!("[producer] queued job {}", job);
                if k.task_delay(2).is_err() {
                    break;
                }
            }
        })
        .unwrap();

    let k = kernel.clone();
    let q = queue.clone();
    kernel
        .task_create("consumer", 3, 4096, move || {
            let mut buf = [0u8; 4];
            for _ in 0..JOBS {
                if q.receive(&mut buf, MAX_TIMEOUT).is_err() {
                    break;
                }
                println!("[consumer] got job {}", u32::from_le_bytes(buf));
            }
            k.stop().unwrap();
        })
        .unwrap();

    let driver = TickDriver::start(kernel.clone()).expect("tick driver failed");
    kernel.start().expect("scheduler start failed");
    driver.stop();
    kernel.shutdown();
}
