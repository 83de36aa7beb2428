//! Writer thread: the only code that puts bytes on the wire.
//!
//! Both `command_write` and `transmit` go through the single-slot [`Outbox`];
//! the writer drains it under the link lock, so two messages can never
//! interleave on the line.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::console::Shared;
use crate::error::{ConsoleError, Result};

#[derive(Debug, Default)]
pub struct Outbox {
    slot: Mutex<Option<Vec<u8>>>,
    changed: Condvar,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place a message, waiting up to `wait` for the previous one to drain.
    pub fn put(&self, bytes: Vec<u8>, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        let mut slot = self.lock();
        while slot.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return Err(ConsoleError::OutboxBusy);
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        *slot = Some(bytes);
        self.changed.notify_all();
        Ok(())
    }

    /// Take the pending message, waiting at most `idle` for one to appear.
    pub fn next(&self, idle: Duration) -> Option<Vec<u8>> {
        let mut slot = self.lock();
        if slot.is_none() {
            slot = self
                .changed
                .wait_timeout(slot, idle)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        let bytes = slot.take();
        if bytes.is_some() {
            self.changed.notify_all();
        }
        bytes
    }

    pub fn clear(&self) {
        *self.lock() = None;
        self.changed.notify_all();
    }
}

pub(crate) fn run(shared: Arc<Shared>) {
    log::debug!("writer started");
    while shared.alive.load(Ordering::Acquire) {
        let Some(bytes) = shared.outbox.next(shared.config.poll_interval) else {
            continue;
        };
        let res = match shared.link().as_mut() {
            Some(link) => link.write_all(&bytes),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "port closed")),
        };
        match res {
            Ok(()) => {
                shared.stats.add_tx(bytes.len());
                log::trace!("[tx] {}", bytes.escape_ascii());
            }
            Err(e) => {
                shared.fault("writer", e);
                break;
            }
        }
    }
    log::debug!("writer stopped");
}
