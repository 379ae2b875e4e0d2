//! Position tracking.
//!
//! The [FrameTracker] places each deframed byte at a `(minor_frame_idx, offset)` position and
//! fires the minor-frame trigger for it. Each [SubcomTracker] places the bytes of its columns
//! into a sub-commutated logical frame and fires the group's triggers.
mod frame;
mod subcom;

pub use frame::{FrameStatus, FrameTracker};
pub use subcom::{SubcomStatus, SubcomTracker, SubcomUpdate};

use crate::trigger::{Target, Trigger};
use crate::Result;

/// A minor-frame byte whose trigger has targets.
#[derive(Debug, Clone, Copy)]
pub struct Fired<'a> {
    pub trigger: &'a Trigger,
    pub minor_frame_idx: usize,
    pub offset: usize,
    pub byte: u8,
    /// The minor frame up to and including `byte`.
    pub frame: &'a [u8],
}

/// Receives the events of a [FrameTracker].
pub trait FrameListener {
    /// A byte was placed at a known position.
    fn byte(&mut self, _minor_frame_idx: usize, _offset: usize, _byte: u8) {}

    /// The last byte of a minor frame with a known index was placed.
    fn frame_complete(&mut self, _minor_frame_idx: usize, _frame: &[u8]) {}

    /// Invoke `targets`, in order, for a fired trigger.
    ///
    /// # Errors
    /// Any error aborts processing of the current byte.
    fn fire(&mut self, fired: &Fired<'_>, targets: &[Target]) -> Result<()>;
}

/// Receives the events of a [SubcomTracker].
pub trait SubcomListener {
    fn byte(&mut self, _group: &str, _slot: usize, _byte: u8) {}

    fn frame_complete(&mut self, _group: &str, _frame: &[u8]) {}
}

impl SubcomListener for () {}
