// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Worker threads.
//!
//! One TX and one RX worker per (port, queue), each pinned to its own core
//! when a core id is assigned. Workers run infinite poll loops with no
//! blocking syscalls; the shared stop flag is checked once per burst.

pub mod rx;
pub mod tx;

use crate::logging::{Facility, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Process-wide stop flag shared by every worker.
pub type StopFlag = Arc<AtomicBool>;

pub fn new_stop_flag() -> StopFlag {
    Arc::new(AtomicBool::new(false))
}

/// Pin the calling thread to `core_id`. Best effort: a failure is reported
/// by the caller, not fatal.
pub fn pin_current_thread(core_id: usize) -> std::io::Result<()> {
    let mut set = nix::sched::CpuSet::new();
    set.set(core_id)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &set)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(())
}

/// A running worker thread.
pub struct WorkerHandle {
    pub name: String,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: String, core_id: Option<usize>, logger: Logger, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                if let Some(core) = core_id {
                    if let Err(e) = pin_current_thread(core) {
                        logger.warning(
                            Facility::Supervisor,
                            &format!("{thread_name}: pinning to core {core} failed: {e}"),
                        );
                    }
                }
                body();
            })
            .expect("spawn worker thread");
        Self { name, handle }
    }

    /// Wait up to `timeout` for the worker to exit. Returns false (and leaks
    /// the thread) when it does not; the caller reports it as hung.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.handle.join().is_ok()
    }
}

/// Spin-then-check helper used by poll loops when a queue back-pressures.
#[inline]
pub fn backoff_spin(stop: &StopFlag) -> bool {
    std::hint::spin_loop();
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_joins_within_timeout() {
        let handle = WorkerHandle::spawn("t".into(), None, Logger::for_tests(), || {});
        assert!(handle.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn hung_worker_reports_timeout() {
        let stop = new_stop_flag();
        let stop_inner = Arc::clone(&stop);
        let handle = WorkerHandle::spawn("hung".into(), None, Logger::for_tests(), move || {
            while !stop_inner.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        assert!(!handle.join_timeout(Duration::from_millis(50)));
        stop.store(true, Ordering::Relaxed);
    }

    #[test]
    fn stop_flag_breaks_backoff() {
        let stop = new_stop_flag();
        assert!(backoff_spin(&stop));
        stop.store(true, Ordering::Relaxed);
        assert!(!backoff_spin(&stop));
    }
}
