//! Console façade over one serial line shared by every controller on the chain.
//!
//! Two background threads own the line: the reader ([`crate::rx`]) and the
//! writer ([`crate::tx`]). Callers use [`Console::command_write`] for a
//! blocking request/response and [`Console::transmit`] for fire-and-forget
//! writes whose replies arrive as unsolicited frames.
//!
//! The protocol has no request ids: the next terminated frame after a write
//! is taken as that write's response. A broadcast that lands in the gap
//! between a command and its reply is indistinguishable from the reply.
//! Only one `command_write` is ever in flight; concurrent callers queue on an
//! internal transaction lock.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::command::{Command, ControlChar};
use crate::error::{ConsoleError, Result};
use crate::exchange::Mailbox;
use crate::frame::{ReceivedFrame, encode};
use crate::port::{Connector, PortSettings, SerialConnector, SerialLink};
use crate::stats::LinkStats;
use crate::tx::Outbox;
use crate::{rx, tx};

/// Handler for frames that did not answer a `command_write`.
///
/// Runs on the reader thread: while it runs no other frame is delivered, so it
/// must not block for long. Calling [`Console::command_write`] from here fails
/// with [`ConsoleError::ReaderContext`]; use [`Console::transmit`] or hand the
/// work to another thread.
pub type FrameCallback = dyn Fn(&Console, ReceivedFrame) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// A loop hit an I/O error. Only `close()` leaves this state.
    Faulted,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// How long `command_write` waits for the reply.
    pub command_timeout: Duration,
    /// Idle sleep of the reader and writer between polls.
    pub poll_interval: Duration,
    /// How long the reader waits for an unread reply to be consumed before
    /// routing the next frame to the callback instead.
    pub handoff_wait: Duration,
    /// How long a write waits for the outbox to drain.
    pub outbox_wait: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            handoff_wait: Duration::from_secs(1),
            outbox_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct Threads {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub(crate) config: ConsoleConfig,
    connector: Arc<dyn Connector>,
    settings: Mutex<PortSettings>,
    state: Mutex<ConsoleState>,
    pub(crate) alive: AtomicBool,
    pub(crate) reader_alive: AtomicBool,
    /// Write handle; holding this lock is holding the wire.
    link: Mutex<Option<Box<dyn SerialLink>>>,
    pub(crate) mailbox: Mailbox,
    pub(crate) outbox: Outbox,
    callback: RwLock<Option<Arc<FrameCallback>>>,
    threads: Mutex<Threads>,
    reader_id: Mutex<Option<ThreadId>>,
    transaction: Mutex<()>,
    pub(crate) stats: LinkStats,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    pub(crate) fn link(&self) -> MutexGuard<'_, Option<Box<dyn SerialLink>>> {
        lock(&self.link)
    }

    pub(crate) fn callback(&self) -> Option<Arc<FrameCallback>> {
        self.callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn state(&self) -> ConsoleState {
        *lock(&self.state)
    }

    fn set_state(&self, s: ConsoleState) {
        *lock(&self.state) = s;
    }

    /// Fatal loop error: stop both loops, drop the connection, wake any caller.
    pub(crate) fn fault(&self, who: &str, err: io::Error) {
        log::error!("{} loop failed: {}", who, err);
        self.alive.store(false, Ordering::Release);
        {
            let mut st = lock(&self.state);
            if *st != ConsoleState::Stopped {
                *st = ConsoleState::Faulted;
            }
        }
        self.link().take();
        self.mailbox.close();
    }
}

/// Shared handle to one console. Clones refer to the same line.
///
/// The background threads hold a handle too, so a running console lives until
/// [`Console::close`] (or `stop` + `join`) is called.
#[derive(Clone)]
pub struct Console {
    shared: Arc<Shared>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("settings", &self.settings())
            .field("state", &self.state())
            .finish()
    }
}

impl Console {
    /// Open a hardware port with default tunables. Threads are not started.
    pub fn open(settings: PortSettings) -> Result<Console> {
        Console::with_connector(Arc::new(SerialConnector), settings, ConsoleConfig::default())
    }

    pub fn with_connector(
        connector: Arc<dyn Connector>,
        settings: PortSettings,
        config: ConsoleConfig,
    ) -> Result<Console> {
        let link = connector.open(&settings)?;
        log::debug!("console settings: {:?}", settings);
        Ok(Console {
            shared: Arc::new(Shared {
                config,
                connector,
                settings: Mutex::new(settings),
                state: Mutex::new(ConsoleState::Stopped),
                alive: AtomicBool::new(false),
                reader_alive: AtomicBool::new(false),
                link: Mutex::new(Some(link)),
                mailbox: Mailbox::new(),
                outbox: Outbox::new(),
                callback: RwLock::new(None),
                threads: Mutex::new(Threads::default()),
                reader_id: Mutex::new(None),
                transaction: Mutex::new(()),
                stats: LinkStats::default(),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /* ---------------- lifecycle ---------------- */

    /// Start the reader and writer, reopening the port if it was closed.
    /// Starting a console that is already up is a no-op.
    pub fn start(&self) -> Result<()> {
        let sh = &self.shared;
        if self.on_reader_thread() {
            return Err(ConsoleError::ReaderContext);
        }
        let mut threads = lock(&sh.threads);
        match sh.state() {
            ConsoleState::Running | ConsoleState::Starting => return Ok(()),
            ConsoleState::Faulted => return Err(ConsoleError::NotRunning(ConsoleState::Faulted)),
            ConsoleState::Stopping | ConsoleState::Stopped => {}
        }
        // stop() or close() without join(): previous loops may still be draining
        join_threads(&mut threads);
        sh.set_state(ConsoleState::Starting);

        let read_link = {
            let mut slot = sh.link();
            let link = match slot.take() {
                Some(l) => l,
                None => sh.connector.open(&self.settings()).inspect_err(|_| {
                    sh.set_state(ConsoleState::Stopped);
                })?,
            };
            let cloned = link.try_clone();
            *slot = Some(link);
            cloned.inspect_err(|_| sh.set_state(ConsoleState::Stopped))?
        };

        sh.outbox.clear();
        sh.alive.store(true, Ordering::Release);
        self.spawn_reader(&mut threads, read_link)?;
        let shared = self.shared.clone();
        threads.writer = Some(
            thread::Builder::new()
                .name("tx".into())
                .spawn(move || tx::run(shared))?,
        );
        sh.set_state(ConsoleState::Running);
        log::info!("console running on {}", self.settings().port);
        Ok(())
    }

    fn spawn_reader(&self, threads: &mut Threads, link: Box<dyn SerialLink>) -> Result<()> {
        self.shared.reader_alive.store(true, Ordering::Release);
        let console = self.clone();
        let handle = thread::Builder::new()
            .name("rx".into())
            .spawn(move || rx::run(console, link))?;
        *lock(&self.shared.reader_id) = Some(handle.thread().id());
        threads.reader = Some(handle);
        Ok(())
    }

    /// Ask both loops to finish. Returns immediately; see [`Console::join`].
    pub fn stop(&self) {
        let sh = &self.shared;
        sh.alive.store(false, Ordering::Release);
        let mut st = lock(&sh.state);
        if matches!(*st, ConsoleState::Running | ConsoleState::Starting) {
            *st = ConsoleState::Stopping;
        }
    }

    /// Wait for the loops to exit. Call after [`Console::stop`] or a fault,
    /// otherwise this blocks for as long as the console runs. Does nothing
    /// when called from the reader thread.
    pub fn join(&self) {
        if self.on_reader_thread() {
            log::warn!("join() from the reader thread ignored");
            return;
        }
        join_threads(&mut lock(&self.shared.threads));
        let mut st = lock(&self.shared.state);
        if *st == ConsoleState::Stopping {
            *st = ConsoleState::Stopped;
        }
    }

    /// Drop the connection and stop the loops without waiting for them.
    /// Safe to call repeatedly, and the only way out of `Faulted`.
    pub fn close(&self) {
        let sh = &self.shared;
        sh.alive.store(false, Ordering::Release);
        sh.reader_alive.store(false, Ordering::Release);
        if sh.link().take().is_some() {
            log::info!("console on {} closed", self.settings().port);
        }
        sh.mailbox.close();
        sh.outbox.clear();
        sh.set_state(ConsoleState::Stopped);
    }

    pub fn is_open(&self) -> bool {
        self.shared.link().is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConsoleState {
        self.shared.state()
    }

    pub fn settings(&self) -> PortSettings {
        lock(&self.shared.settings).clone()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.shared.stats
    }

    /* ---------------- callback ---------------- */

    pub fn set_callback<F>(&self, f: F)
    where
        F: Fn(&Console, ReceivedFrame) + Send + Sync + 'static,
    {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(f));
    }

    pub fn clear_callback(&self) {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    /* ---------------- I/O ---------------- */

    /// Send `command` and wait for an ACK reply.
    pub fn command_write(
        &self,
        command: Command,
        args: &[&dyn fmt::Display],
    ) -> Result<ReceivedFrame> {
        let text = command.format(args)?;
        let args = args.iter().map(|a| a.to_string()).collect();
        self.exchange(text, args)
    }

    /// Send a bare control character as a command line and wait for an ACK.
    pub fn control_write(&self, ctrl: ControlChar) -> Result<ReceivedFrame> {
        self.exchange(char::from(ctrl.byte()).to_string(), Vec::new())
    }

    fn exchange(&self, text: String, args: Vec<String>) -> Result<ReceivedFrame> {
        let sh = &self.shared;
        self.ensure_running()?;
        if self.on_reader_thread() {
            return Err(ConsoleError::ReaderContext);
        }

        let _txn = lock(&sh.transaction);
        sh.mailbox.open();
        if let Err(e) = sh.outbox.put(encode(&text), sh.config.outbox_wait) {
            sh.mailbox.close();
            return Err(e);
        }
        log::debug!("command sent [{}]", text);

        let Some(frame) = sh.mailbox.take(sh.config.command_timeout) else {
            self.ensure_running()?;
            sh.stats.inc_timeout();
            return Err(ConsoleError::Timeout(sh.config.command_timeout));
        };
        if !frame.is_ack() {
            return Err(ConsoleError::NotAcknowledged {
                command: text,
                args,
                response: frame.raw().to_vec(),
            });
        }
        Ok(frame)
    }

    /// Queue raw bytes for the writer without waiting for a reply.
    ///
    /// Never waits for a response, but if the previous message has not
    /// reached the wire yet this blocks up to `ConsoleConfig::outbox_wait`
    /// before failing with [`ConsoleError::OutboxBusy`]. Use
    /// [`Console::try_transmit`] where even that wait is unacceptable.
    pub fn transmit(&self, data: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.shared
            .outbox
            .put(data.to_vec(), self.shared.config.outbox_wait)
    }

    /// Like [`Console::transmit`], but fails with `OutboxBusy` at once
    /// instead of waiting for the outbox to drain.
    pub fn try_transmit(&self, data: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.shared.outbox.put(data.to_vec(), Duration::ZERO)
    }

    /// Queue a single control byte, e.g. [`ControlChar::Dc2`] to poll telemetry.
    pub fn transmit_control(&self, ctrl: ControlChar) -> Result<()> {
        self.transmit(&[ctrl.byte()])
    }

    pub fn try_transmit_control(&self, ctrl: ControlChar) -> Result<()> {
        self.try_transmit(&[ctrl.byte()])
    }

    fn on_reader_thread(&self) -> bool {
        *lock(&self.shared.reader_id) == Some(thread::current().id())
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ConsoleState::Running => Ok(()),
            s => Err(ConsoleError::NotRunning(s)),
        }
    }

    /* ---------------- reconfiguration ---------------- */

    /// Change the line speed in place. A rejected rate leaves the previous
    /// one in effect.
    pub fn change_baudrate(&self, baud: u32) -> Result<()> {
        let sh = &self.shared;
        let mut link = sh.link();
        let Some(l) = link.as_mut() else {
            return Err(ConsoleError::NotRunning(sh.state()));
        };
        let mut settings = lock(&sh.settings);
        let previous = settings.baud;
        if let Err(e) = l.set_baud_rate(baud) {
            log::warn!("baud {} rejected, keeping {}: {}", baud, previous, e);
            if let Err(e) = l.set_baud_rate(previous) {
                log::error!("restoring baud {} failed: {}", previous, e);
            }
            return Err(e.into());
        }
        settings.baud = baud;
        log::info!("baud changed {} -> {}", previous, baud);
        Ok(())
    }

    /// Move the console to another device with the same line settings.
    ///
    /// The new port is opened before the old one is released, so a failed
    /// open leaves the current connection and reader untouched. Returns
    /// `false` when `port` is empty or already in use. Refused from the
    /// reader thread, which would have to join itself, and on a faulted
    /// console, which only `close()` may leave.
    pub fn change_port(&self, port: &str) -> Result<bool> {
        let sh = &self.shared;
        if self.on_reader_thread() {
            return Err(ConsoleError::ReaderContext);
        }
        if sh.state() == ConsoleState::Faulted {
            return Err(ConsoleError::NotRunning(ConsoleState::Faulted));
        }
        let current = self.settings();
        if port.is_empty() || port == current.port {
            return Ok(false);
        }
        let next = current.with_port(port);
        let new_link = sh.connector.open(&next)?;

        let mut threads = lock(&sh.threads);
        let restart = threads.reader.is_some() && sh.alive.load(Ordering::Acquire);
        sh.reader_alive.store(false, Ordering::Release);
        if let Some(h) = threads.reader.take()
            && h.join().is_err()
        {
            log::error!("reader thread panicked");
        }
        *lock(&sh.reader_id) = None;
        // the old link may have failed while the reader drained
        if sh.state() == ConsoleState::Faulted {
            return Err(ConsoleError::NotRunning(ConsoleState::Faulted));
        }

        let read_link = if restart {
            Some(new_link.try_clone()?)
        } else {
            None
        };
        *sh.link() = Some(new_link);
        *lock(&sh.settings) = next;
        sh.mailbox.close();
        log::info!("console moved {} -> {}", current.port, port);

        if let Some(l) = read_link {
            self.spawn_reader(&mut threads, l)?;
        }
        Ok(true)
    }
}

fn join_threads(threads: &mut Threads) {
    for (name, h) in [("writer", threads.writer.take()), ("reader", threads.reader.take())] {
        if let Some(h) = h
            && h.join().is_err()
        {
            log::error!("{} thread panicked", name);
        }
    }
}
