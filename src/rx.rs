use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::thread;

use crate::console::Console;
use crate::frame::{FrameBuffer, FrameKind, ReceivedFrame, decode};
use crate::port::SerialLink;

const READ_CHUNK: usize = 512;

/// Reader thread body. Runs until the console stops, the reader alone is
/// stopped for a port change, or the link fails.
///
/// Unsolicited frames are handed to the registered callback on this thread.
/// A callback that panics faults the console like an I/O error would.
pub(crate) fn run(console: Console, mut link: Box<dyn SerialLink>) {
    let shared = console.shared();
    let mut lines = FrameBuffer::new();
    let mut buf = [0u8; READ_CHUNK];
    log::debug!("reader started");

    'read: while shared.alive.load(Ordering::Acquire) && shared.reader_alive.load(Ordering::Acquire)
    {
        let n = match read_available(&mut *link, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                shared.fault("reader", e);
                break;
            }
        };
        if n == 0 {
            thread::sleep(shared.config.poll_interval);
            continue;
        }
        shared.stats.add_rx(n);
        log::trace!("[rx] {}", buf[..n].escape_ascii());

        for raw in lines.push(&buf[..n]) {
            let frame = decode(&raw);
            shared.stats.inc_frame(frame.kind() != FrameKind::Unknown);
            if let Err(e) = deliver(&console, frame) {
                shared.fault("reader", e);
                break 'read;
            }
        }
    }
    log::debug!("reader stopped");
}

/// Whatever is buffered, without blocking when nothing is.
fn read_available(link: &mut dyn SerialLink, buf: &mut [u8]) -> io::Result<usize> {
    let avail = link.bytes_to_read()?;
    if avail == 0 {
        return Ok(0);
    }
    let n = avail.min(buf.len());
    link.read(&mut buf[..n])
}

fn deliver(console: &Console, frame: ReceivedFrame) -> io::Result<()> {
    let shared = console.shared();
    let Err(frame) = shared.mailbox.offer(frame, shared.config.handoff_wait) else {
        return Ok(());
    };
    let Some(cb) = shared.callback() else {
        log::warn!("uncaught console event received: {:?}", frame);
        return Ok(());
    };
    panic::catch_unwind(AssertUnwindSafe(|| cb(console, frame)))
        .map_err(|_| io::Error::other("frame callback panicked"))
}
