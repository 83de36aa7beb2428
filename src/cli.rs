use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use jbod_console::command::Command;
use jbod_console::port::PortSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "jbodctl", about = "JBOD controller console over a serial daisy chain")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Log unsolicited controller events (shutdown requests, telemetry, resets)
    Monitor(MonitorOpts),
    /// Send one command and print the acknowledged payload
    Send(SendOpts),
    /// Walk the chain and list controllers
    Discover(DiscoverOpts),
    /// Set a fan's PWM duty (clamped to 20..=99)
    Pwm(PwmOpts),
    /// Read a fan's RPM
    Rpm(RpmOpts),
    /// Read a controller's PSU state
    Status(StatusOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Port read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
}

impl SerialOpts {
    pub fn settings(&self) -> PortSettings {
        let mut s = PortSettings::new(self.dev.clone())
            .baud(self.baud)
            .timeout(Duration::from_millis(self.timeout_ms));
        s.rtscts = self.rtscts;
        s
    }
}

#[derive(Args, Debug, Clone)]
pub struct MonitorOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Telemetry poll: "off" or seconds between DC2 requests
    #[arg(long, default_value = "off")]
    pub poll: String,
    /// Stats print interval in seconds (0 disables)
    #[arg(long, default_value_t = 60.0)]
    pub stats: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Command name (status, shutdown, pwm, rpm, id, ...)
    pub command: Command,
    /// Values for the command's `?` placeholders, controller id first
    pub args: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DiscoverOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// First controller id to query
    #[arg(long, default_value_t = 1)]
    pub start: u32,
    /// Query only this controller id
    #[arg(long)]
    pub id: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct PwmOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    pub id: u32,
    pub fan: u32,
    pub value: u8,
}

#[derive(Args, Debug, Clone)]
pub struct RpmOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    pub id: u32,
    pub fan: u32,
}

#[derive(Args, Debug, Clone)]
pub struct StatusOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    pub id: u32,
}

/// Typed `--poll` value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Poll {
    Off,
    Every(Duration),
}

impl Poll {
    pub fn from_cli(poll: &str) -> anyhow::Result<Self> {
        if poll.eq_ignore_ascii_case("off") {
            return Ok(Poll::Off);
        }
        let secs: f64 = poll
            .parse()
            .map_err(|_| anyhow!("poll must be seconds or 'off'"))?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(anyhow!("poll interval must be positive"));
        }
        Ok(Poll::Every(Duration::from_secs_f64(secs)))
    }
}
