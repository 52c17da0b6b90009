// SPDX-License-Identifier: Apache-2.0 OR MIT
// Consumer thread draining the log rings into a sink

use super::entry::LogEntry;
use super::ringbuffer::LogRing;
use super::Facility;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Where drained log lines end up.
pub trait LogSink: Send + 'static {
    fn write_entry(&mut self, entry: &LogEntry);

    fn flush(&mut self) {}
}

/// Default sink: one line per entry to stderr.
#[derive(Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let _ = writeln!(std::io::stderr().lock(), "{}", entry.render());
    }
}

/// Capturing sink for tests.
#[derive(Default, Clone)]
pub struct VecSink {
    pub lines: Arc<Mutex<Vec<LogEntry>>>,
}

impl LogSink for VecSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        self.lines.lock().unwrap().push(entry.clone());
    }
}

/// Drains all facility rings on a dedicated thread.
pub struct Consumer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

impl Consumer {
    pub fn spawn(rings: Vec<(Facility, Arc<LogRing>)>, mut sink: impl LogSink) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("log-consumer".into())
            .spawn(move || {
                loop {
                    let mut drained = 0usize;
                    for (_, ring) in &rings {
                        while let Some(entry) = ring.pop() {
                            sink.write_entry(&entry);
                            drained += 1;
                        }
                    }
                    if drained == 0 {
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        std::thread::sleep(DRAIN_INTERVAL);
                    }
                }
                // Final sweep so shutdown-time messages are not lost.
                for (facility, ring) in &rings {
                    while let Some(entry) = ring.pop() {
                        sink.write_entry(&entry);
                    }
                    let dropped = ring.dropped();
                    if dropped > 0 {
                        sink.write_entry(&LogEntry::new(
                            super::Severity::Warning,
                            *facility,
                            &format!("{dropped} log entries dropped (ring full)"),
                        ));
                    }
                }
                sink.flush();
            })
            .expect("spawn log consumer");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the consumer and wait for the final drain.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogRegistry, Severity};

    #[test]
    fn consumer_drains_entries_to_sink() {
        let registry = LogRegistry::new(Severity::Debug);
        let logger = registry.logger(Facility::Test);
        let sink = VecSink::default();
        let lines = Arc::clone(&sink.lines);

        let consumer = Consumer::spawn(registry.rings(), sink);
        logger.info(Facility::Test, "hello");
        logger.warning(Facility::Test, "world");
        consumer.shutdown();

        let captured = lines.lock().unwrap();
        let messages: Vec<_> = captured.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.contains(&"hello"));
        assert!(messages.contains(&"world"));
    }

    #[test]
    fn consumer_reports_dropped_entries() {
        let ring = Arc::new(LogRing::new(1));
        let logger_ring = Arc::clone(&ring);
        logger_ring.write(LogEntry::new(Severity::Info, Facility::Test, "kept"));
        logger_ring.write(LogEntry::new(Severity::Info, Facility::Test, "lost"));

        let sink = VecSink::default();
        let lines = Arc::clone(&sink.lines);
        let consumer = Consumer::spawn(vec![(Facility::Test, ring)], sink);
        consumer.shutdown();

        let captured = lines.lock().unwrap();
        assert!(captured
            .iter()
            .any(|e| e.message.contains("dropped (ring full)")));
    }
}
