//! Wire codec for the JBOD console line.
//!
//! Outgoing lines are ASCII text followed by `\r\n`. Incoming lines look like
//! `<control byte><payload><NUL padding>*\r\n`; the leading control byte
//! decides how the frame is routed.

use std::fmt;

use crate::command::ControlChar;

pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Longest unterminated run kept before the accumulator gives up on it.
pub const MAX_PENDING: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ack,
    Nak,
    XOff,
    XOn,
    Dc2,
    Dc4,
    /// No recognised leading control byte.
    Unknown,
}

impl FrameKind {
    fn from_lead(b: u8) -> FrameKind {
        match ControlChar::from_byte(b) {
            Some(ControlChar::Ack) => FrameKind::Ack,
            Some(ControlChar::Nak) => FrameKind::Nak,
            Some(ControlChar::XOff) => FrameKind::XOff,
            Some(ControlChar::XOn) => FrameKind::XOn,
            Some(ControlChar::Dc2) => FrameKind::Dc2,
            Some(ControlChar::Dc4) => FrameKind::Dc4,
            _ => FrameKind::Unknown,
        }
    }
}

/// One terminated message from the controller. Immutable once decoded.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    raw: Vec<u8>,
    kind: FrameKind,
    data: Option<String>,
}

impl ReceivedFrame {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_ack(&self) -> bool {
        self.kind == FrameKind::Ack
    }

    /// Bytes exactly as received, terminator included.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Payload after the control byte; `None` for unclassified frames.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Payload, or `""` when there is none.
    pub fn payload(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }
}

impl fmt::Debug for ReceivedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedFrame")
            .field("kind", &self.kind)
            .field("data", &self.data)
            .field("raw", &self.raw.escape_ascii().to_string())
            .finish()
    }
}

pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + TERMINATOR.len());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(TERMINATOR);
    out
}

/// Classify a raw message by its leading control byte.
///
/// Never fails: empty, truncated or unrecognised input yields
/// [`FrameKind::Unknown`] with no payload.
pub fn decode(raw: &[u8]) -> ReceivedFrame {
    let (kind, data) = match raw.split_first() {
        Some((&lead, rest)) => match FrameKind::from_lead(lead) {
            FrameKind::Unknown => (FrameKind::Unknown, None),
            kind => (kind, Some(String::from_utf8_lossy(trim_padding(rest)).into_owned())),
        },
        None => (FrameKind::Unknown, None),
    };
    ReceivedFrame {
        raw: raw.to_vec(),
        kind,
        data,
    }
}

fn trim_padding(mut b: &[u8]) -> &[u8] {
    let pad = |c: &u8| matches!(*c, b'\r' | b'\n' | 0);
    while let Some((first, rest)) = b.split_first()
        && pad(first)
    {
        b = rest;
    }
    while let Some((last, rest)) = b.split_last()
        && pad(last)
    {
        b = rest;
    }
    b
}

/// Accumulates reads and cuts them into terminator-delimited messages.
///
/// Bytes after the last terminator are carried into the next push, so a
/// burst holding several broadcasts yields every one of them.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and return every complete message, terminator included.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let mut out = Vec::new();
        while let Some(pos) = self
            .pending
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
        {
            let rest = self.pending.split_off(pos + TERMINATOR.len());
            out.push(std::mem::replace(&mut self.pending, rest));
        }
        if self.pending.len() > MAX_PENDING {
            log::warn!(
                "dropping {} unterminated bytes from console line",
                self.pending.len()
            );
            self.pending.clear();
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_with_payload() {
        let f = decode(b"\x06\x00ON\x00\r\n");
        assert!(f.is_ack());
        assert_eq!(f.data(), Some("ON"));
        assert_eq!(f.raw(), b"\x06\x00ON\x00\r\n");
    }

    #[test]
    fn nak_is_not_ack() {
        let f = decode(b"\x15\x00\r\n");
        assert_eq!(f.kind(), FrameKind::Nak);
        assert!(!f.is_ack());
        assert_eq!(f.payload(), "");
    }

    #[test]
    fn dc2_json_payload() {
        let f = decode(b"\x12{\"a\":1}\x00\r\n");
        assert_eq!(f.kind(), FrameKind::Dc2);
        assert_eq!(f.payload(), "{\"a\":1}");
    }

    #[test]
    fn bare_ack_has_empty_payload() {
        let f = decode(b"\x06\r\n");
        assert!(f.is_ack());
        assert_eq!(f.data(), Some(""));
    }

    #[test]
    fn unknown_and_empty_do_not_panic() {
        let cases: [&[u8]; 4] = [b"", b"\r\n", b"OK\r\n", b"\x05\r\n"];
        for raw in cases {
            let f = decode(raw);
            assert_eq!(f.kind(), FrameKind::Unknown, "{raw:?}");
            assert_eq!(f.data(), None);
            assert!(!f.is_ack());
        }
        // truncated before the terminator still classifies
        assert!(decode(b"\x06").is_ack());
    }

    #[test]
    fn other_control_kinds() {
        assert_eq!(decode(b"\x13\x00\r\n").kind(), FrameKind::XOff);
        assert_eq!(decode(b"\x11\x00\r\n").kind(), FrameKind::XOn);
        let f = decode(b"\x14\x00reset_event:7\x00\r\n");
        assert_eq!(f.kind(), FrameKind::Dc4);
        assert_eq!(f.payload(), "reset_event:7");
    }

    #[test]
    fn encode_appends_crlf() {
        assert_eq!(encode("jbod/1 id"), b"jbod/1 id\r\n");
        assert_eq!(encode(""), b"\r\n");
    }

    #[test]
    fn buffer_waits_for_terminator() {
        let mut buf = FrameBuffer::new();
        assert!(buf.push(b"\x06\x00v2.").is_empty());
        assert!(buf.push(b"0.0\x00\r").is_empty());
        let frames = buf.push(b"\n");
        assert_eq!(frames, vec![b"\x06\x00v2.0.0\x00\r\n".to_vec()]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn buffer_splits_bursts_and_carries_tail() {
        let mut buf = FrameBuffer::new();
        let frames = buf.push(b"\x12\x00{a}\x00\r\n\x12\x00{b}\x00\r\n\x06");
        assert_eq!(frames.len(), 2);
        assert_eq!(decode(&frames[1]).payload(), "{b}");
        assert_eq!(buf.pending(), 1);
        let frames = buf.push(b"\x00OK\x00\r\n");
        assert_eq!(decode(&frames[0]).payload(), "OK");
    }

    #[test]
    fn buffer_drops_runaway_garbage() {
        let mut buf = FrameBuffer::new();
        buf.push(&vec![b'x'; MAX_PENDING + 1]);
        assert_eq!(buf.pending(), 0);
    }
}
