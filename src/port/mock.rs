//! In-memory serial line with a scripted controller on the far end.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Connector, PortSettings, SerialLink};
use crate::error::{ConsoleError, Result};
use crate::frame::{FrameBuffer, TERMINATOR};

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct DeviceState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    baud: u32,
    lines: FrameBuffer,
    responder: Option<Responder>,
    fail_reads: bool,
    fail_writes: bool,
    hold_writes: bool,
    rejected_bauds: Vec<u32>,
}

/// Far end of a simulated line. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    links: Arc<AtomicUsize>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes for the host to read.
    pub fn inject(&self, data: &[u8]) {
        self.lock().rx.extend(data.iter().copied());
    }

    /// Script replies: called with each complete line the host writes
    /// (terminator included); the returned bytes are queued for the host.
    pub fn respond_with<F>(&self, f: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(f));
    }

    /// Everything the host has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().tx.clone()
    }

    pub fn written_lines(&self) -> Vec<String> {
        let tx = self.written();
        String::from_utf8_lossy(&tx)
            .split_terminator("\r\n")
            .map(str::to_string)
            .collect()
    }

    pub fn baud(&self) -> u32 {
        self.lock().baud
    }

    pub fn reject_baud(&self, baud: u32) {
        self.lock().rejected_bauds.push(baud);
    }

    /// Make every subsequent read fail as if the adapter were unplugged.
    pub fn unplug(&self) {
        self.lock().fail_reads = true;
    }

    /// Make every subsequent write fail, reads keep working.
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    /// Park writers until [`MockDevice::release_writes`].
    pub fn hold_writes(&self) {
        self.lock().hold_writes = true;
    }

    pub fn release_writes(&self) {
        self.lock().hold_writes = false;
    }

    /// Live link handles, across clones.
    pub fn open_links(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }

    fn link(&self) -> MockLink {
        self.links.fetch_add(1, Ordering::SeqCst);
        MockLink {
            device: self.clone(),
        }
    }
}

pub struct MockLink {
    device: MockDevice,
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.device.links.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SerialLink for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut st = self.device.lock();
        if st.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        let n = buf.len().min(st.rx.len());
        for (slot, b) in buf.iter_mut().zip(st.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        while self.device.lock().hold_writes {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        if self.device.lock().fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        // one byte per lock so unsynchronised writers would visibly interleave
        for &b in data {
            let mut st = self.device.lock();
            st.tx.push(b);
            let lines = st.lines.push(&[b]);
            for line in lines {
                let reply = st.responder.as_ref().and_then(|r| r(&line));
                if let Some(reply) = reply {
                    st.rx.extend(reply);
                }
            }
            drop(st);
            std::thread::yield_now();
        }
        Ok(())
    }

    fn bytes_to_read(&self) -> io::Result<usize> {
        let st = self.device.lock();
        if st.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(st.rx.len())
    }

    fn baud_rate(&self) -> io::Result<u32> {
        Ok(self.device.lock().baud)
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        let mut st = self.device.lock();
        if st.rejected_bauds.contains(&baud) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("baud {baud} not supported"),
            ));
        }
        st.baud = baud;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.device.link()))
    }
}

/// Hands out links to registered devices; unknown names fail to open.
#[derive(Clone, Default)]
pub struct MockConnector {
    devices: Arc<Mutex<HashMap<String, MockDevice>>>,
    opens: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, port: &str) -> MockDevice {
        let dev = MockDevice::new();
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port.to_string(), dev.clone());
        dev
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn SerialLink>> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let dev = devices.get(&settings.port).ok_or_else(|| {
            ConsoleError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device {}", settings.port),
            ))
        })?;
        dev.lock().baud = settings.baud;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(dev.link()))
    }
}

/// Canned controller replies, keyed by request line without terminator.
pub fn canned(
    table: &'static [(&'static str, &'static str)],
) -> impl Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static {
    move |line: &[u8]| {
        let line = line.strip_suffix(TERMINATOR).unwrap_or(line);
        table
            .iter()
            .find(|(req, _)| req.as_bytes() == line)
            .map(|(_, resp)| resp.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_replies_per_line() {
        let conn = MockConnector::new();
        let dev = conn.attach("sim0");
        dev.respond_with(canned(&[("jbod/1 id", "\x06\x00uuid\x00\r\n")]));
        let mut link = conn.open(&PortSettings::new("sim0")).unwrap();
        link.write_all(b"jbod/1 id\r\njbod/9 id\r\n").unwrap();
        assert_eq!(link.bytes_to_read().unwrap(), 9);
        let mut buf = [0u8; 32];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x06\x00uuid\x00\r\n");
        assert_eq!(dev.written_lines(), vec!["jbod/1 id", "jbod/9 id"]);
    }

    #[test]
    fn unknown_port_fails_and_links_are_counted() {
        let conn = MockConnector::new();
        let dev = conn.attach("sim0");
        assert!(conn.open(&PortSettings::new("sim1")).is_err());
        let link = conn.open(&PortSettings::new("sim0")).unwrap();
        let clone = link.try_clone().unwrap();
        assert_eq!(dev.open_links(), 2);
        drop(link);
        drop(clone);
        assert_eq!(dev.open_links(), 0);
    }
}
