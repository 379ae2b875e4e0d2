use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, trace};

use super::SubcomListener;
use crate::config::SubcomGroup;
use crate::element::GroupLookup;
use crate::trigger::{lock, Namespace, Target, Trigger, TriggerRegistry};
use crate::{Error, Result};

/// Result of placing one byte in a logical frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SubcomUpdate {
    pub slot: usize,
    pub trigger: Trigger,
    /// Targets registered for [Self::trigger], to be invoked by the caller.
    pub targets: Vec<Target>,
    /// Whether this byte completed the logical frame.
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubcomStatus {
    pub key: String,
    /// Bytes received of the frame being assembled.
    pub fill: usize,
    pub length: usize,
    pub complete_frames: u64,
    pub discontinuities: u64,
}

/// Reassembles one sub-commutated group's logical frames from its minor-frame columns.
///
/// Minor frame `i` carries logical bytes `i * width .. (i + 1) * width` (modulo the group
/// length) in its columns, so the slot of every column in every minor frame is known up front.
#[derive(Debug)]
pub struct SubcomTracker {
    key: String,
    length: usize,
    columns: Vec<usize>,
    /// Slot of each column, per minor frame index.
    slots: Vec<Vec<usize>>,
    frame: Vec<u8>,
    last_frame: Vec<u8>,
    started: bool,
    complete_frames: u64,
    discontinuities: u64,
    registry: Arc<Mutex<TriggerRegistry<Target>>>,
}

impl SubcomTracker {
    /// # Errors
    /// [Error::UnsortedColumns] if columns are not strictly ascending, or [Error::Config] if
    /// the group's bytes do not tile the cycle exactly.
    pub fn new(group: &SubcomGroup, cycle_length: usize) -> Result<Self> {
        if group.columns.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::UnsortedColumns {
                group: group.key.clone(),
                columns: group.columns.clone(),
            });
        }
        if group.length == 0 || group.columns.is_empty() {
            return Err(Error::Config(format!("group {} is empty", group.key)));
        }

        let mut slots = Vec::with_capacity(cycle_length);
        let mut slot = 0;
        for _ in 0..cycle_length {
            let mut frame_slots = Vec::with_capacity(group.columns.len());
            for _ in &group.columns {
                frame_slots.push(slot);
                slot = (slot + 1) % group.length;
            }
            slots.push(frame_slots);
        }
        if slot != 0 {
            return Err(Error::Config(format!(
                "group {} of {} bytes over {} columns does not fit {} minor frames",
                group.key,
                group.length,
                group.columns.len(),
                cycle_length
            )));
        }

        Ok(SubcomTracker {
            key: group.key.clone(),
            length: group.length,
            columns: group.columns.clone(),
            slots,
            frame: Vec::with_capacity(group.length),
            last_frame: Vec::default(),
            started: false,
            complete_frames: 0,
            discontinuities: 0,
            registry: Arc::default(),
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Slot of every column, per minor frame index.
    #[must_use]
    pub fn offset_map(&self) -> &[Vec<usize>] {
        &self.slots
    }

    /// Logical slot carried by `offset` of minor frame `minor_frame_idx`, if it is one of
    /// our columns.
    #[must_use]
    pub fn slot(&self, minor_frame_idx: usize, offset: usize) -> Option<usize> {
        let column = self.columns.binary_search(&offset).ok()?;
        self.slots.get(minor_frame_idx).map(|s| s[column])
    }

    /// Minor-frame triggers this tracker must be registered on.
    #[must_use]
    pub fn minor_frame_triggers(&self) -> Vec<Trigger> {
        self.columns
            .iter()
            .map(|c| Trigger::every_minor_frame(*c))
            .collect()
    }

    /// Frame being assembled.
    #[must_use]
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Last complete frame, empty until one completes.
    #[must_use]
    pub fn last_frame(&self) -> &[u8] {
        &self.last_frame
    }

    /// Frame holding the most recently placed byte.
    #[must_use]
    pub fn latest(&self) -> &[u8] {
        if self.frame.is_empty() {
            &self.last_frame
        } else {
            &self.frame
        }
    }

    /// Byte `index` from the frame being assembled, falling back to the last complete frame.
    #[must_use]
    pub fn lookback(&self, index: usize) -> Option<u8> {
        self.frame
            .get(index)
            .or_else(|| self.last_frame.get(index))
            .copied()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Mutex<TriggerRegistry<Target>>> {
        &self.registry
    }

    /// # Errors
    /// [Error::Config] if `trigger` is not a position of this group.
    pub fn register(&self, trigger: Trigger, target: Target) -> Result<bool> {
        self.check(&trigger)?;
        Ok(lock(&self.registry).register(trigger, target))
    }

    pub fn unregister(&self, trigger: &Trigger, target: &Target) -> bool {
        lock(&self.registry).unregister(trigger, target)
    }

    fn check(&self, trigger: &Trigger) -> Result<()> {
        let ours = matches!(&trigger.namespace, Namespace::Subcom(key) if *key == self.key);
        match trigger.indices.as_slice() {
            [idx] if ours && *idx < self.length => Ok(()),
            _ => Err(Error::Config(format!(
                "{trigger} is not a position of {} byte group {}",
                self.length, self.key
            ))),
        }
    }

    /// Place a byte received at `offset` of minor frame `minor_frame_idx`.
    ///
    /// Going backwards truncates the frame being assembled and skipping ahead zero-fills the
    /// gap; both count as a discontinuity, except for the gap before the very first byte.
    ///
    /// # Errors
    /// [Error::Dispatch] if `offset` is not one of our columns.
    pub fn update<L: SubcomListener>(
        &mut self,
        byte: u8,
        minor_frame_idx: usize,
        offset: usize,
        listener: &mut L,
    ) -> Result<SubcomUpdate> {
        let slot = self.slot(minor_frame_idx, offset).ok_or_else(|| {
            Error::Dispatch(format!(
                "{}:{} is not a column of {}",
                minor_frame_idx, offset, self.key
            ))
        })?;

        let len = self.frame.len();
        if slot < len {
            self.discontinuities += 1;
            debug!(group = %self.key, slot, len, "sub-commutation went backwards");
            self.frame.truncate(slot);
        } else if slot > len {
            if self.started {
                self.discontinuities += 1;
                debug!(group = %self.key, slot, len, "sub-commutation skipped ahead");
            }
            self.frame.resize(slot, 0);
        }
        self.started = true;
        self.frame.push(byte);
        listener.byte(&self.key, slot, byte);

        let trigger = Trigger::subcom(&self.key, slot);
        let targets = lock(&self.registry).resolve(&trigger);

        let completed = self.frame.len() == self.length;
        if completed {
            self.last_frame = std::mem::take(&mut self.frame);
            self.complete_frames += 1;
            trace!(group = %self.key, count = self.complete_frames, "logical frame complete");
            listener.frame_complete(&self.key, &self.last_frame);
        }

        Ok(SubcomUpdate {
            slot,
            trigger,
            targets,
            completed,
        })
    }

    /// Drop the frame being assembled. Counters are kept.
    pub fn reset(&mut self) {
        self.frame.clear();
        self.started = false;
    }

    #[must_use]
    pub fn status(&self) -> SubcomStatus {
        SubcomStatus {
            key: self.key.clone(),
            fill: self.frame.len(),
            length: self.length,
            complete_frames: self.complete_frames,
            discontinuities: self.discontinuities,
        }
    }
}

impl GroupLookup for Vec<SubcomTracker> {
    fn group_byte(&self, group: &str, index: usize) -> Option<u8> {
        self.iter()
            .find(|t| t.key == group)
            .and_then(|t| t.lookback(index))
    }
}
