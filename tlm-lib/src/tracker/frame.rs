use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::{Fired, FrameListener};
use crate::config::MissionConfig;
use crate::trigger::{lock, Namespace, Target, Trigger, TriggerRegistry};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameStatus {
    pub minor_frame_idx: Option<usize>,
    /// Whether the counter is trusted and only checked for sustained mismatches.
    pub trusted: bool,
    pub complete_frames: u64,
    pub discontinuities: u64,
    /// Counter mismatches tolerated while trusted.
    pub ignored_mismatches: u64,
}

/// Places deframed bytes within the major-frame cycle.
///
/// The minor frame index is taken from the counter byte and then expected to advance by one
/// every minor frame. Before the index is known, bytes preceding the counter are held; once
/// the counter arrives they are replayed so every byte of the frame is dispatched in order.
///
/// After [MissionConfig::trust_limit] consecutive matching counters the counter is trusted,
/// and only [MissionConfig::mismatch_limit] consecutive mismatches cause the index to be
/// dropped. Untrusted, a single mismatch drops it.
#[derive(Debug)]
pub struct FrameTracker {
    frame_length: usize,
    cycle_length: usize,
    counter_offset: usize,
    trust_limit: usize,
    mismatch_limit: usize,

    minor_frame_idx: Option<usize>,
    /// Minor frame being received.
    current: Vec<u8>,
    last_frame: Vec<u8>,
    /// Most recent content seen at each minor frame index.
    major_frame: Vec<Vec<u8>>,

    matches: usize,
    trusted: bool,
    mismatches: usize,

    complete_frames: u64,
    discontinuities: u64,
    ignored_mismatches: u64,

    registry: Arc<Mutex<TriggerRegistry<Target>>>,
}

impl FrameTracker {
    #[must_use]
    pub fn new(mission: &MissionConfig) -> Self {
        FrameTracker {
            frame_length: mission.frame_length,
            cycle_length: mission.cycle_length,
            counter_offset: mission.counter_offset,
            trust_limit: mission.trust_limit,
            mismatch_limit: mission.mismatch_limit,
            minor_frame_idx: None,
            current: Vec::with_capacity(mission.frame_length),
            last_frame: Vec::default(),
            major_frame: vec![Vec::default(); mission.cycle_length],
            matches: 0,
            trusted: false,
            mismatches: 0,
            complete_frames: 0,
            discontinuities: 0,
            ignored_mismatches: 0,
            registry: Arc::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Mutex<TriggerRegistry<Target>>> {
        &self.registry
    }

    /// # Errors
    /// [Error::Config] if `trigger` is not a minor-frame position.
    pub fn register(&self, trigger: Trigger, target: Target) -> Result<bool> {
        self.check(&trigger)?;
        Ok(lock(&self.registry).register(trigger, target))
    }

    pub fn unregister(&self, trigger: &Trigger, target: &Target) -> bool {
        lock(&self.registry).unregister(trigger, target)
    }

    fn check(&self, trigger: &Trigger) -> Result<()> {
        let valid = trigger.namespace == Namespace::MinorFrame
            && match trigger.indices.as_slice() {
                [offset] => *offset < self.frame_length,
                [idx, offset] => *idx < self.cycle_length && *offset < self.frame_length,
                _ => false,
            };
        if valid {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "{trigger} is not a position of a {} byte minor frame",
                self.frame_length
            )))
        }
    }

    #[must_use]
    pub fn minor_frame_idx(&self) -> Option<usize> {
        self.minor_frame_idx
    }

    /// Last complete minor frame.
    #[must_use]
    pub fn last_frame(&self) -> &[u8] {
        &self.last_frame
    }

    /// Most recent bytes seen at minor frame `idx`.
    #[must_use]
    pub fn minor_frame(&self, idx: usize) -> Option<&[u8]> {
        self.major_frame.get(idx).map(Vec::as_slice)
    }

    #[must_use]
    pub fn status(&self) -> FrameStatus {
        FrameStatus {
            minor_frame_idx: self.minor_frame_idx,
            trusted: self.trusted,
            complete_frames: self.complete_frames,
            discontinuities: self.discontinuities,
            ignored_mismatches: self.ignored_mismatches,
        }
    }

    /// Forget the position in the cycle. Counters are kept.
    pub fn reset(&mut self) {
        self.minor_frame_idx = None;
        self.current.clear();
        self.last_frame.clear();
        for frame in &mut self.major_frame {
            frame.clear();
        }
        self.drop_trust();
    }

    fn drop_trust(&mut self) {
        self.matches = 0;
        self.trusted = false;
        self.mismatches = 0;
    }

    fn lose_index(&mut self) {
        self.minor_frame_idx = None;
        self.drop_trust();
    }

    /// Handle one deframed byte.
    ///
    /// `frame` is the minor frame received so far, ending with `byte` at `offset`. `resync`
    /// marks the first byte after the deframer (re)acquired sync.
    ///
    /// # Errors
    /// [Error::Dispatch] if `offset` lies outside the minor frame, or any error returned by
    /// `listener`.
    pub fn update<L: FrameListener>(
        &mut self,
        byte: u8,
        frame: &[u8],
        resync: bool,
        offset: usize,
        listener: &mut L,
    ) -> Result<()> {
        if offset >= self.frame_length {
            return Err(Error::Dispatch(format!(
                "offset {offset} outside of {} byte minor frame",
                self.frame_length
            )));
        }
        if resync {
            debug!("resync, minor frame index unknown");
            self.reset();
        }

        self.current.truncate(offset);
        if self.current.len() < offset {
            let start = self.current.len();
            let fill = frame.get(start..offset).ok_or_else(|| {
                Error::Dispatch(format!("frame of {} bytes at offset {offset}", frame.len()))
            })?;
            self.current.extend_from_slice(fill);
        }
        self.current.push(byte);

        if offset == 0 {
            if let Some(idx) = self.minor_frame_idx {
                self.minor_frame_idx = Some((idx + 1) % self.cycle_length);
            }
        }

        if offset == self.counter_offset {
            self.check_counter(byte, listener)?;
        }

        if self.minor_frame_idx.is_some() {
            self.assign(offset, false, listener)?;
        }
        Ok(())
    }

    fn check_counter<L: FrameListener>(&mut self, counter: u8, listener: &mut L) -> Result<()> {
        let counter = usize::from(counter);
        let Some(expected) = self.minor_frame_idx else {
            if counter >= self.cycle_length {
                debug!(counter, "counter outside of cycle, index still unknown");
                return Ok(());
            }
            // the counter byte itself is assigned by the caller
            return self.start_at(counter, self.current.len() - 1, listener);
        };

        if counter == expected {
            self.mismatches = 0;
            self.matches += 1;
            if !self.trusted && self.matches >= self.trust_limit {
                debug!(idx = expected, "minor frame counter trusted");
                self.trusted = true;
            }
        } else if self.trusted {
            self.discontinuities += 1;
            self.mismatches += 1;
            self.ignored_mismatches += 1;
            trace!(counter, expected, run = self.mismatches, "ignoring counter mismatch");
            if self.mismatches >= self.mismatch_limit {
                warn!(counter, expected, "sustained counter mismatch, index lost");
                self.lose_index();
            }
        } else {
            debug!(counter, expected, "counter mismatch, index lost");
            self.discontinuities += 1;
            self.lose_index();
        }
        Ok(())
    }

    /// Set the index of the minor frame being received.
    ///
    /// If the index was unknown, the bytes already received in this minor frame are replayed.
    /// Otherwise they were dispatched when they arrived and only the bytes still to come are
    /// placed at the new index.
    ///
    /// # Errors
    /// [Error::Dispatch] if `idx` is outside of the cycle, or any error returned by
    /// `listener` during the replay.
    pub fn set_minor_frame_idx<L: FrameListener>(
        &mut self,
        idx: usize,
        listener: &mut L,
    ) -> Result<()> {
        if self.minor_frame_idx.is_none() {
            return self.start_at(idx, self.current.len(), listener);
        }
        self.check_idx(idx)?;
        debug!(idx, "minor frame index replaced");
        self.minor_frame_idx = Some(idx);
        self.drop_trust();
        Ok(())
    }

    fn check_idx(&self, idx: usize) -> Result<()> {
        if idx >= self.cycle_length {
            return Err(Error::Dispatch(format!(
                "minor frame index {idx} outside of {} frame cycle",
                self.cycle_length
            )));
        }
        Ok(())
    }

    /// Take `idx` as the index of the current minor frame and replay its first `replay`
    /// bytes.
    fn start_at<L: FrameListener>(
        &mut self,
        idx: usize,
        replay: usize,
        listener: &mut L,
    ) -> Result<()> {
        self.check_idx(idx)?;
        debug!(idx, replay, "minor frame index set");
        self.minor_frame_idx = Some(idx);
        self.drop_trust();
        for offset in 0..replay {
            self.assign(offset, true, listener)?;
        }
        Ok(())
    }

    /// Dispatch the byte at `offset` of the current minor frame, whose index is known.
    fn assign<L: FrameListener>(
        &mut self,
        offset: usize,
        replay: bool,
        listener: &mut L,
    ) -> Result<()> {
        let Some(idx) = self.minor_frame_idx else {
            return Ok(());
        };
        let byte = self.current[offset];

        let slot = &mut self.major_frame[idx];
        if slot.len() != offset {
            slot.clear();
            slot.extend_from_slice(&self.current[..offset]);
        }
        slot.push(byte);

        listener.byte(idx, offset, byte);

        let trigger = Trigger::minor_frame(idx, offset);
        let targets = lock(&self.registry).resolve(&trigger);
        if !targets.is_empty() {
            if replay {
                trace!(%trigger, "replayed");
            }
            let fired = Fired {
                trigger: &trigger,
                minor_frame_idx: idx,
                offset,
                byte,
                frame: &self.current[..=offset],
            };
            listener.fire(&fired, &targets)?;
        }

        if offset + 1 == self.frame_length {
            self.complete_frames += 1;
            self.last_frame.clone_from(&self.current);
            listener.frame_complete(idx, &self.last_frame);
        }
        Ok(())
    }
}
