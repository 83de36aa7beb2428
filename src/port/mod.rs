use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::Result;

#[cfg(test)]
pub mod mock;

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The three values the console needs from configuration, plus flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub port: String,
    pub baud: u32,
    pub timeout: Duration,
    pub rtscts: bool,
}

impl PortSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
            rtscts: false,
        }
    }

    pub fn baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same line settings on a different device.
    pub fn with_port(&self, port: &str) -> Self {
        Self {
            port: port.to_string(),
            ..self.clone()
        }
    }
}

/// An open duplex byte stream. Handles obtained through [`SerialLink::try_clone`]
/// share the underlying device, so a baud change on one applies to all.
pub trait SerialLink: Send {
    /// Read into `buf`; `Ok(0)` when the read timed out with nothing to return.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn bytes_to_read(&self) -> io::Result<usize>;
    fn baud_rate(&self) -> io::Result<u32>;
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;
    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>>;
}

/// Opens links by device name. The console reopens through this on a port change.
pub trait Connector: Send + Sync {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn SerialLink>>;
}

/// Real hardware via the `serialport` crate, 8N1.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn SerialLink>> {
        let port = open_port(settings)?;
        log::info!("opened {} at {} baud", settings.port, settings.baud);
        Ok(Box::new(NativeLink(port)))
    }
}

pub fn open_port(settings: &PortSettings) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(&settings.port, settings.baud)
        .timeout(settings.timeout)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if settings.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        });

    Ok(builder.open()?)
}

pub struct NativeLink(Box<dyn SerialPort>);

impl SerialLink for NativeLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.write_all(data)?;
        self.0.flush()
    }

    fn bytes_to_read(&self) -> io::Result<usize> {
        Ok(self.0.bytes_to_read()? as usize)
    }

    fn baud_rate(&self) -> io::Result<u32> {
        Ok(self.0.baud_rate()?)
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        Ok(self.0.set_baud_rate(baud)?)
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(NativeLink(self.0.try_clone()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_port_keeps_line_settings() {
        let s = PortSettings::new("/dev/ttyUSB0")
            .baud(9600)
            .timeout(Duration::from_millis(250));
        let moved = s.with_port("/dev/ttyUSB1");
        assert_eq!(moved.port, "/dev/ttyUSB1");
        assert_eq!(moved.baud, 9600);
        assert_eq!(moved.timeout, Duration::from_millis(250));
    }

    #[test]
    fn open_missing_device_fails() {
        let s = PortSettings::new("/dev/this-port-does-not-exist");
        assert!(SerialConnector.open(&s).is_err());
    }
}
