use std::time::Duration;

use thiserror::Error;

use crate::console::ConsoleState;

#[derive(Debug, Error)]
pub enum ConsoleError {
    /// No terminated frame arrived within the command bound.
    #[error("no response from controller within {0:?}")]
    Timeout(Duration),
    /// A frame arrived but it was NAK or carried no known control byte.
    #[error(
        "command not acknowledged by JBOD controller; command sent [{command}]; args {args:?}; response {response:?}"
    )]
    NotAcknowledged {
        command: String,
        args: Vec<String>,
        response: Vec<u8>,
    },
    #[error("template {template:?} takes {expected} argument(s), got {got}")]
    ArgCount {
        template: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("console is {0:?}")]
    NotRunning(ConsoleState),
    /// `command_write` from the reader thread would wait on itself.
    #[error("command_write called from the reader thread")]
    ReaderContext,
    #[error("outbox still holds an unsent message")]
    OutboxBusy,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("telemetry payload: {0}")]
    Telemetry(#[from] serde_json::Error),
    #[error("unexpected controller reply: {0}")]
    Event(String),
}

impl ConsoleError {
    /// Transaction-level failure the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConsoleError::Timeout(_) | ConsoleError::NotAcknowledged { .. } | ConsoleError::OutboxBusy
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
