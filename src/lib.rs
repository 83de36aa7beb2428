//! Host side of the JBOD controller console: a text protocol on a shared
//! serial line where one host talks to a daisy chain of fan/PSU controllers.

pub mod command;
pub mod console;
pub mod error;
pub mod events;
pub mod exchange;
pub mod frame;
pub mod jbod;
pub mod port;
mod rx;
pub mod stats;
mod tx;

pub use command::{Command, ControlChar};
pub use console::{Console, ConsoleConfig, ConsoleState};
pub use error::{ConsoleError, Result};
pub use events::ConsoleEvent;
pub use frame::{FrameKind, ReceivedFrame};
pub use jbod::Jbod;
pub use port::PortSettings;
