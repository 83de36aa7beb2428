use std::fmt;

use crate::error::{ConsoleError, Result};

/// Positional placeholder inside a command template.
pub const WILDCARD: char = '?';

/// Request templates understood by the JBOD controller firmware.
///
/// Wildcards are filled left-to-right with controller id, fan/led port and
/// value, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ---- PSU ----
    Shutdown,
    Startup,
    CancelShutdown,
    Status,

    // ---- MCU ----
    Reset,
    Alarm,
    DeviceId,
    FirmwareVersion,
    Ping,
    LedOn,
    LedOff,

    // ---- Fans ----
    Pwm,
    Rpm,
    FanCount,
}

impl Command {
    pub const ALL: [Command; 14] = [
        Command::Shutdown,
        Command::Startup,
        Command::CancelShutdown,
        Command::Status,
        Command::Reset,
        Command::Alarm,
        Command::DeviceId,
        Command::FirmwareVersion,
        Command::Ping,
        Command::LedOn,
        Command::LedOff,
        Command::Pwm,
        Command::Rpm,
        Command::FanCount,
    ];

    pub fn template(self) -> &'static str {
        match self {
            Command::Shutdown => "jbod/? psu shutdown",
            Command::Startup => "jbod/? psu startup",
            Command::CancelShutdown => "jbod/? psu cancel",
            Command::Status => "jbod/? psu status",
            Command::Reset => "jbod/? reset",
            Command::Alarm => "jbod/? alarm ?",
            Command::DeviceId => "jbod/? id",
            Command::FirmwareVersion => "jbod/? version",
            Command::Ping => "jbod/? ping",
            Command::LedOn => "jbod/? led/? ON",
            Command::LedOff => "jbod/? led/? OFF",
            Command::Pwm => "jbod/? pwm fan/? ?",
            Command::Rpm => "jbod/? rpm fan/?",
            Command::FanCount => "jbod/? fans",
        }
    }

    pub fn wildcards(self) -> usize {
        self.template().matches(WILDCARD).count()
    }

    /// Substitute `args` into the template.
    ///
    /// The argument count must match the wildcard count; a mismatch would put
    /// a malformed line on the wire, so it is rejected before anything is sent.
    pub fn format(self, args: &[&dyn fmt::Display]) -> Result<String> {
        let expected = self.wildcards();
        if args.len() != expected {
            return Err(ConsoleError::ArgCount {
                template: self.template(),
                expected,
                got: args.len(),
            });
        }
        Ok(substitute(self.template(), args))
    }

    /// Name used on the command line, e.g. `cancel-shutdown`.
    pub fn name(self) -> &'static str {
        match self {
            Command::Shutdown => "shutdown",
            Command::Startup => "startup",
            Command::CancelShutdown => "cancel-shutdown",
            Command::Status => "status",
            Command::Reset => "reset",
            Command::Alarm => "alarm",
            Command::DeviceId => "id",
            Command::FirmwareVersion => "version",
            Command::Ping => "ping",
            Command::LedOn => "led-on",
            Command::LedOff => "led-off",
            Command::Pwm => "pwm",
            Command::Rpm => "rpm",
            Command::FanCount => "fans",
        }
    }
}

impl std::str::FromStr for Command {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown command: {s}"))
    }
}

/// Replace each wildcard left-to-right with the next argument.
///
/// Lax by itself: surplus arguments are ignored and missing ones leave the
/// wildcard in place. [`Command::format`] checks the count first.
pub fn substitute(template: &str, args: &[&dyn fmt::Display]) -> String {
    let mut out = String::with_capacity(template.len() + args.len() * 4);
    let mut args = args.iter();
    for c in template.chars() {
        if c != WILDCARD {
            out.push(c);
            continue;
        }
        match args.next() {
            Some(a) => {
                use std::fmt::Write;
                let _ = write!(out, "{}", a);
            }
            None => out.push(WILDCARD),
        }
    }
    out
}

/// ASCII control codes with a protocol meaning on the JBOD line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlChar {
    /// Enquiry
    Enq = 0x05,
    /// Command acknowledged
    Ack = 0x06,
    Lf = 0x0A,
    Cr = 0x0D,
    /// Remote cancels a pending host shutdown
    XOn = 0x11,
    /// Telemetry snapshot broadcast (also the poll request)
    Dc2 = 0x12,
    /// Remote requests host shutdown
    XOff = 0x13,
    /// Miscellaneous event broadcast, e.g. reset reason
    Dc4 = 0x14,
    /// Command rejected
    Nak = 0x15,
}

impl ControlChar {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x05 => ControlChar::Enq,
            0x06 => ControlChar::Ack,
            0x0A => ControlChar::Lf,
            0x0D => ControlChar::Cr,
            0x11 => ControlChar::XOn,
            0x12 => ControlChar::Dc2,
            0x13 => ControlChar::XOff,
            0x14 => ControlChar::Dc4,
            0x15 => ControlChar::Nak,
            _ => return None,
        })
    }
}
