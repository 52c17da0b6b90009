// SPDX-License-Identifier: Apache-2.0 OR MIT
// Lock-free logging for the packet workers.
//
// Workers format at the call site and push fixed-size entries into a bounded
// MPSC ring; a consumer thread drains the ring into a sink. A full ring drops
// the entry and counts it; the hot path never blocks on I/O.

mod consumer;
mod entry;
mod facility;
mod logger;
mod ringbuffer;
mod severity;

pub use consumer::{Consumer, LogSink, StderrSink, VecSink};
pub use entry::LogEntry;
pub use facility::Facility;
pub use logger::{LogRegistry, Logger};
pub use ringbuffer::LogRing;
pub use severity::Severity;
