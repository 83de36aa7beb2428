//! Typed view of frames that arrive outside a command exchange.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{FrameKind, ReceivedFrame};

/// Why a controller MCU restarted, as reported in a DC4 `reset_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetReason {
    Unknown = 0,
    LowPower = 1,
    WindowWatchdog = 2,
    IndependentWatchdog = 3,
    Software = 4,
    PowerOnPowerDown = 5,
    ExternalPin = 6,
    Brownout = 7,
}

impl ResetReason {
    /// Out-of-range codes map to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ResetReason::LowPower,
            2 => ResetReason::WindowWatchdog,
            3 => ResetReason::IndependentWatchdog,
            4 => ResetReason::Software,
            5 => ResetReason::PowerOnPowerDown,
            6 => ResetReason::ExternalPin,
            7 => ResetReason::Brownout,
            _ => ResetReason::Unknown,
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResetReason::Unknown => "UNKNOWN_RESET",
            ResetReason::LowPower => "LOW_POWER_RESET",
            ResetReason::WindowWatchdog => "WINDOW_WATCHDOG_RESET",
            ResetReason::IndependentWatchdog => "INDEPENDENT_WATCHDOG_RESET",
            ResetReason::Software => "SOFTWARE_RESET",
            ResetReason::PowerOnPowerDown => "POWER_ON_POWER_DOWN_RESET",
            ResetReason::ExternalPin => "EXTERNAL_PIN_RESET",
            ResetReason::Brownout => "BROWNOUT_RESET",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub psu: String,
    #[serde(default)]
    pub rpm: Vec<u32>,
    #[serde(default)]
    pub pwm: Vec<u8>,
}

/// Periodic DC2 broadcast from one controller.
///
/// `{"mcu":"466-2038344B513050-19-1003","data":{"psu":"ON","rpm":[1000,1200],"pwm":[40,30]}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub mcu: String,
    pub data: TelemetryData,
}

impl Telemetry {
    pub fn parse(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    pub fn psu_on(&self) -> bool {
        self.data.psu == "ON"
    }

    /// `(port_num, rpm, pwm)` per fan port, ports counted from 1. A missing
    /// pwm entry reads as 0.
    pub fn fans(&self) -> impl Iterator<Item = (usize, u32, u8)> + '_ {
        self.data
            .rpm
            .iter()
            .enumerate()
            .map(|(i, &rpm)| (i + 1, rpm, self.data.pwm.get(i).copied().unwrap_or(0)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// XOFF: the controller asks the host to power down.
    ShutdownRequested,
    /// XON: power-on request while the host is already up.
    ShutdownCancelled,
    Telemetry(Telemetry),
    Reset(ResetReason),
    /// DC4 message other than a reset report, split on the first `:`.
    Misc { kind: String, body: String },
    /// DC2 payload that is not valid telemetry.
    Malformed { frame: ReceivedFrame, error: String },
    /// ACK, NAK or unclassified frame with no exchange waiting for it.
    Uncaught(ReceivedFrame),
}

impl ConsoleEvent {
    pub fn from_frame(frame: &ReceivedFrame) -> Self {
        match frame.kind() {
            FrameKind::XOff => ConsoleEvent::ShutdownRequested,
            FrameKind::XOn => ConsoleEvent::ShutdownCancelled,
            FrameKind::Dc2 => match Telemetry::parse(frame.payload()) {
                Ok(t) => ConsoleEvent::Telemetry(t),
                Err(e) => ConsoleEvent::Malformed {
                    frame: frame.clone(),
                    error: e.to_string(),
                },
            },
            FrameKind::Dc4 => {
                let (kind, body) = frame
                    .payload()
                    .split_once(':')
                    .unwrap_or((frame.payload(), ""));
                if kind == "reset_event"
                    && let Ok(code) = body.trim().parse::<u8>()
                {
                    return ConsoleEvent::Reset(ResetReason::from_code(code));
                }
                ConsoleEvent::Misc {
                    kind: kind.to_string(),
                    body: body.to_string(),
                }
            }
            FrameKind::Ack | FrameKind::Nak | FrameKind::Unknown => {
                ConsoleEvent::Uncaught(frame.clone())
            }
        }
    }

    /// Log the event at the level an operator would want to see it.
    pub fn log(&self) {
        match self {
            ConsoleEvent::ShutdownRequested => {
                log::warn!("shutdown request received from controller")
            }
            ConsoleEvent::ShutdownCancelled => {
                log::warn!("power-on event received but host is already on")
            }
            ConsoleEvent::Telemetry(t) => {
                log::info!(
                    "[dc2] {} psu={} fans={:?}",
                    t.mcu,
                    t.data.psu,
                    t.fans().collect::<Vec<_>>()
                );
            }
            ConsoleEvent::Reset(r) => log::warn!("controller reset event: {}", r),
            ConsoleEvent::Misc { kind, body } => {
                log::warn!("unknown dc4 event message received: {}:{}", kind, body)
            }
            ConsoleEvent::Malformed { frame, error } => {
                log::error!("unable to parse controller data {:?}: {}", frame, error)
            }
            ConsoleEvent::Uncaught(frame) => {
                log::warn!("uncaught console event received: {:?}", frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode;

    fn ev(raw: &[u8]) -> ConsoleEvent {
        ConsoleEvent::from_frame(&decode(raw))
    }

    #[test]
    fn power_requests() {
        assert_eq!(ev(b"\x13\x00\r\n"), ConsoleEvent::ShutdownRequested);
        assert_eq!(ev(b"\x11\x00\r\n"), ConsoleEvent::ShutdownCancelled);
    }

    #[test]
    fn dc2_telemetry() {
        let raw = b"\x12\x00{\"mcu\":\"466-2038344B513050-19-1003\",\"data\":{\"psu\":\"ON\",\"rpm\":[1000,1200,0,3000],\"pwm\":[40,30,0]}}\x00\x00\r\n";
        let ConsoleEvent::Telemetry(t) = ev(raw) else {
            panic!("not telemetry");
        };
        assert_eq!(t.mcu, "466-2038344B513050-19-1003");
        assert!(t.psu_on());
        let fans: Vec<_> = t.fans().collect();
        assert_eq!(
            fans,
            vec![(1, 1000, 40), (2, 1200, 30), (3, 0, 0), (4, 3000, 0)]
        );
    }

    #[test]
    fn dc2_garbage_is_malformed() {
        assert!(matches!(
            ev(b"\x12\x00{psu:ON\x00\r\n"),
            ConsoleEvent::Malformed { .. }
        ));
    }

    #[test]
    fn dc4_reset_and_misc() {
        assert_eq!(
            ev(b"\x14\x00reset_event:3\x00\r\n"),
            ConsoleEvent::Reset(ResetReason::IndependentWatchdog)
        );
        assert_eq!(
            ev(b"\x14\x00reset_event:42\x00\r\n"),
            ConsoleEvent::Reset(ResetReason::Unknown)
        );
        assert_eq!(
            ev(b"\x14\x00fan_stall:2\x00\r\n"),
            ConsoleEvent::Misc {
                kind: "fan_stall".into(),
                body: "2".into()
            }
        );
        assert_eq!(
            ev(b"\x14\x00hello\r\n"),
            ConsoleEvent::Misc {
                kind: "hello".into(),
                body: String::new()
            }
        );
    }

    #[test]
    fn stray_ack_is_uncaught() {
        assert!(matches!(ev(b"\x06\x00late\x00\r\n"), ConsoleEvent::Uncaught(_)));
        assert!(matches!(ev(b"noise\r\n"), ConsoleEvent::Uncaught(_)));
    }

    #[test]
    fn reset_reason_names() {
        assert_eq!(ResetReason::from_code(7).to_string(), "BROWNOUT_RESET");
        assert_eq!(ResetReason::from_code(0), ResetReason::Unknown);
    }
}
