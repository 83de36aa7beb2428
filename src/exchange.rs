//! Single-slot hand-off between the reader thread and a blocked `command_write`.
//!
//! The line is half-duplex and commands are not pipelined, so at most one
//! exchange is open and the slot holds at most one unread frame. "New data"
//! is a consume-once flag, never a queue.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::ReceivedFrame;

#[derive(Debug, Default)]
struct Slot {
    open: bool,
    frame: Option<ReceivedFrame>,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a transaction, discarding whatever a previous one left behind.
    pub fn open(&self) {
        let mut slot = self.lock();
        if let Some(stale) = slot.frame.take() {
            log::debug!("flushing stale frame {:?}", stale);
        }
        slot.open = true;
        self.changed.notify_all();
    }

    /// Abandon the transaction without consuming anything.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.open = false;
        slot.frame = None;
        self.changed.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Reader side. Hands `frame` to the waiting caller, first giving an unread
    /// frame up to `wait` to be consumed. Returns the frame back when nobody is
    /// waiting or the slot stayed full, so it can go to the unsolicited path.
    pub fn offer(&self, frame: ReceivedFrame, wait: Duration) -> Result<(), ReceivedFrame> {
        let deadline = Instant::now() + wait;
        let mut slot = self.lock();
        while slot.open && slot.frame.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return Err(frame);
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        if !slot.open {
            return Err(frame);
        }
        slot.frame = Some(frame);
        self.changed.notify_all();
        Ok(())
    }

    /// Caller side. Waits up to `timeout` for a frame; either way the
    /// transaction is closed on return.
    pub fn take(&self, timeout: Duration) -> Option<ReceivedFrame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while slot.frame.is_none() {
            let now = Instant::now();
            if now >= deadline || !slot.open {
                break;
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        let frame = slot.frame.take();
        slot.open = false;
        self.changed.notify_all();
        frame
    }
}
