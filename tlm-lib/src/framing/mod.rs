//! Frame recovery.
//!
//! A [Deframer] turns input [Buffer]s into synchronized bytes, each delivered to an
//! [Acceptor] together with the minor frame received so far and the byte's offset in it.
mod discrete;
mod symbol;

pub use discrete::FrameDeframer;
pub use symbol::SymbolDeframer;

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Input buffer flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    /// Data was lost before this buffer.
    pub dropped: bool,
    /// First buffer of a stream.
    pub first: bool,
    /// Last buffer of a stream.
    pub last: bool,
    /// The source flagged the contents as corrupt.
    pub bad: bool,
}

/// A chunk of input, either one whole frame or an arbitrary run of symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub data: Vec<u8>,
    pub flags: Flags,
    /// Reception time, used to stamp decoded values.
    pub time: DateTime<Utc>,
}

impl Buffer {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Buffer {
            data,
            flags: Flags::default(),
            time: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    WaitingForSync,
    Receiving,
}

impl Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::WaitingForSync => write!(f, "waiting for sync"),
            SyncState::Receiving => write!(f, "receiving"),
        }
    }
}

/// Receives synchronized bytes from a [Deframer].
pub trait Acceptor {
    /// `frame` holds the minor frame received so far, ending with `byte` at `offset`.
    /// `resync` is set on the first byte after sync was (re)acquired.
    ///
    /// # Errors
    /// Any error stops the deframer and is returned from [Deframer::process].
    fn accept(&mut self, byte: u8, frame: &[u8], resync: bool, offset: usize) -> Result<()>;
}

impl<F> Acceptor for F
where
    F: FnMut(u8, &[u8], bool, usize) -> Result<()>,
{
    fn accept(&mut self, byte: u8, frame: &[u8], resync: bool, offset: usize) -> Result<()> {
        self(byte, frame, resync, offset)
    }
}

/// Recovers frame boundaries from a stream of [Buffer]s.
pub trait Deframer: Send {
    /// Consume one buffer, handing every synchronized byte to `acceptor`.
    ///
    /// # Errors
    /// Only errors returned by `acceptor`. Synchronization faults are counted, not
    /// returned.
    fn process(&mut self, buffer: &Buffer, acceptor: &mut dyn Acceptor) -> Result<()>;

    fn complete_frames(&self) -> u64;

    fn sync_resets(&self) -> u64;

    fn state(&self) -> SyncState;
}

/// Fold big-endian bytes into a word.
pub(crate) fn word(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}
