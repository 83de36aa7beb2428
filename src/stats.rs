use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the reader, writer and callers.
#[derive(Debug, Default)]
pub struct LinkStats {
    bytes_recv: AtomicU64,
    bytes_trans: AtomicU64,
    frames: AtomicU64,
    unknown: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_recv: u64,
    pub bytes_trans: u64,
    pub frames: u64,
    pub unknown: u64,
    pub timeouts: u64,
}

impl LinkStats {
    pub fn add_rx(&self, n: usize) {
        self.bytes_recv.fetch_add(n as u64, Ordering::Relaxed);
    }
    pub fn add_tx(&self, n: usize) {
        self.bytes_trans.fetch_add(n as u64, Ordering::Relaxed);
    }
    pub fn inc_frame(&self, known: bool) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        if !known {
            self.unknown.fetch_add(1, Ordering::Relaxed);
        }
    }
    pub fn inc_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_recv: self.bytes_recv.load(Ordering::Relaxed),
            bytes_trans: self.bytes_trans.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Read and zero all counters.
    pub fn take(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_recv: self.bytes_recv.swap(0, Ordering::Relaxed),
            bytes_trans: self.bytes_trans.swap(0, Ordering::Relaxed),
            frames: self.frames.swap(0, Ordering::Relaxed),
            unknown: self.unknown.swap(0, Ordering::Relaxed),
            timeouts: self.timeouts.swap(0, Ordering::Relaxed),
        }
    }
}

/// Periodic summary line for long-running commands.
#[derive(Debug)]
pub struct StatsPrinter {
    every_s: f64,
    last: Instant,
}

impl StatsPrinter {
    pub fn new(every_s: f64) -> Self {
        Self {
            every_s,
            last: Instant::now(),
        }
    }

    pub fn maybe_print(&mut self, stats: &LinkStats) {
        if self.every_s <= 0.0 || self.last.elapsed().as_secs_f64() < self.every_s {
            return;
        }
        let dur = self.last.elapsed().as_secs_f64().max(1e-3);
        let s = stats.take();
        log::info!(
            "[link] rx={}B tx={}B frames={} unknown={} timeouts={} over {:.1}s",
            s.bytes_recv,
            s.bytes_trans,
            s.frames,
            s.unknown,
            s.timeouts,
            dur
        );
        self.last = Instant::now();
    }
}
