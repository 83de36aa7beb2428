//! Typed calls for one controller on the daisy chain.

use std::fmt;
use std::str::FromStr;

use crate::command::Command;
use crate::console::Console;
use crate::error::{ConsoleError, Result};

/// The controller takes exactly two PWM digits.
pub const MIN_FAN_PWM: u8 = 20;
pub const MAX_FAN_PWM: u8 = 99;

/// Piezo duty that sounds well on the stock buzzer.
pub const ALARM_DUTY: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsuState {
    On,
    Off,
}

impl FromStr for PsuState {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ON" => Ok(PsuState::On),
            "OFF" => Ok(PsuState::Off),
            other => Err(ConsoleError::Event(format!("psu state {other:?}"))),
        }
    }
}

impl fmt::Display for PsuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PsuState::On => "ON",
            PsuState::Off => "OFF",
        })
    }
}

/// MCU identity reported by `id`.
///
/// Firmware answers either a bare device id or `{id:..,lot:..,waf:..,rev:..}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub lot: Option<String>,
    pub wafer: Option<String>,
    pub revision: Option<String>,
}

impl DeviceIdentity {
    pub fn parse(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        let Some(body) = payload
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
        else {
            if payload.is_empty() {
                return Err(ConsoleError::Event("empty device id".into()));
            }
            return Ok(DeviceIdentity {
                device_id: payload.to_string(),
                ..Default::default()
            });
        };

        let mut ident = DeviceIdentity::default();
        for field in body.split(',') {
            let Some((key, value)) = field.split_once(':') else {
                return Err(ConsoleError::Event(format!("device id field {field:?}")));
            };
            let value = value.trim().to_string();
            match key.trim() {
                "id" => ident.device_id = value,
                "lot" => ident.lot = Some(value),
                "waf" => ident.wafer = Some(value),
                "rev" => ident.revision = Some(value),
                other => log::debug!("ignoring device id field {}", other),
            }
        }
        if ident.device_id.is_empty() {
            return Err(ConsoleError::Event(format!("no id in {payload:?}")));
        }
        Ok(ident)
    }
}

/// PWM for the hottest disk temperature from a fan curve of
/// `(temp, pwm)` points.
///
/// Below the coolest point its PWM applies; otherwise the PWM of the highest
/// point at or under `max_temp`, so anything above the hottest point gets its
/// PWM. An empty curve yields `None`. Points need not be sorted.
pub fn setpoint_pwm(setpoints: &[(i32, u8)], max_temp: i32) -> Option<u8> {
    let coolest = setpoints.iter().min_by_key(|(t, _)| *t)?;
    let pwm = setpoints
        .iter()
        .filter(|(t, _)| *t <= max_temp)
        .max_by_key(|(t, _)| *t)
        .unwrap_or(coolest)
        .1;
    Some(pwm)
}

fn number<T: FromStr>(what: &str, payload: &str) -> Result<T> {
    payload
        .trim()
        .parse()
        .map_err(|_| ConsoleError::Event(format!("{what}: not a number: {payload:?}")))
}

/// One controller, addressed by its position on the chain.
#[derive(Debug, Clone)]
pub struct Jbod {
    console: Console,
    id: u32,
}

impl Jbod {
    pub fn new(console: Console, id: u32) -> Self {
        Self { console, id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn send(&self, cmd: Command, rest: &[&dyn fmt::Display]) -> Result<String> {
        let mut args: Vec<&dyn fmt::Display> = Vec::with_capacity(rest.len() + 1);
        args.push(&self.id);
        args.extend_from_slice(rest);
        let frame = self.console.command_write(cmd, &args)?;
        Ok(frame.payload().to_string())
    }

    pub fn psu_status(&self) -> Result<PsuState> {
        self.send(Command::Status, &[])?.parse()
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown, &[]).map(drop)
    }

    pub fn startup(&self) -> Result<()> {
        self.send(Command::Startup, &[]).map(drop)
    }

    pub fn cancel_shutdown(&self) -> Result<()> {
        self.send(Command::CancelShutdown, &[]).map(drop)
    }

    /// Hard reset of the MCU. A DC4 `reset_event` follows once it is back.
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset, &[]).map(drop)
    }

    /// Set a fan port's duty cycle, clamped to what the controller accepts.
    /// Returns the value the controller echoed, or the clamped value if the
    /// reply carried none.
    pub fn set_pwm(&self, fan: u32, pwm: u8) -> Result<u8> {
        let pwm = pwm.clamp(MIN_FAN_PWM, MAX_FAN_PWM);
        let echoed = self.send(Command::Pwm, &[&fan, &pwm])?;
        if echoed.trim().is_empty() {
            return Ok(pwm);
        }
        number("pwm", &echoed)
    }

    /// Drive `fan` from its curve. Sends PWM only when the curve's value
    /// differs from `current`; returns the new duty if one was sent.
    pub fn apply_setpoint(
        &self,
        fan: u32,
        current: Option<u8>,
        setpoints: &[(i32, u8)],
        max_temp: i32,
    ) -> Result<Option<u8>> {
        let Some(target) = setpoint_pwm(setpoints, max_temp) else {
            log::debug!("jbod/{} fan/{}: no setpoints", self.id, fan);
            return Ok(None);
        };
        let target = target.clamp(MIN_FAN_PWM, MAX_FAN_PWM);
        if current == Some(target) {
            log::debug!("jbod/{} fan/{} setpoint unchanged at {}", self.id, fan, target);
            return Ok(None);
        }
        let set = self.set_pwm(fan, target)?;
        log::info!("jbod/{} fan/{} setpoint updated to {} at {}C", self.id, fan, set, max_temp);
        Ok(Some(set))
    }

    pub fn rpm(&self, fan: u32) -> Result<u32> {
        number("rpm", &self.send(Command::Rpm, &[&fan])?)
    }

    /// Drive the buzzer at `duty` percent; 0 silences it.
    pub fn alarm(&self, duty: u8) -> Result<()> {
        let duty = format!("{:02}", duty.min(99));
        self.send(Command::Alarm, &[&duty]).map(drop)
    }

    pub fn fan_count(&self) -> Result<u32> {
        number("fans", &self.send(Command::FanCount, &[])?)
    }

    pub fn device_id(&self) -> Result<DeviceIdentity> {
        DeviceIdentity::parse(&self.send(Command::DeviceId, &[])?)
    }

    pub fn firmware_version(&self) -> Result<String> {
        self.send(Command::FirmwareVersion, &[])
    }

    pub fn ping(&self) -> Result<()> {
        self.send(Command::Ping, &[]).map(drop)
    }

    pub fn led(&self, index: u32, on: bool) -> Result<()> {
        let cmd = if on { Command::LedOn } else { Command::LedOff };
        self.send(cmd, &[&index]).map(drop)
    }
}

/// Walk the chain from `start`, asking each position for its device id,
/// until a position stays silent or refuses. With `only` set, ask just
/// that id.
pub fn discover(console: &Console, start: u32, only: Option<u32>) -> Result<Vec<(u32, DeviceIdentity)>> {
    let mut found = Vec::new();
    let mut id = only.unwrap_or(start);
    loop {
        let jbod = Jbod::new(console.clone(), id);
        match jbod.device_id() {
            Ok(ident) => {
                log::info!("controller {} found: {}", id, ident.device_id);
                found.push((id, ident));
            }
            Err(e @ (ConsoleError::Timeout(_) | ConsoleError::NotAcknowledged { .. })) => {
                log::debug!("discovery stopped at {}: {}", id, e);
                break;
            }
            Err(e) => return Err(e),
        }
        if only.is_some() {
            break;
        }
        id += 1;
    }
    Ok(found)
}
