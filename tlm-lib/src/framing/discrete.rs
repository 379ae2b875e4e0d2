use tracing::{debug, trace};

use super::{word, Acceptor, Buffer, Deframer, SyncState};
use crate::Result;

/// Deframer for sources that deliver one whole minor frame per buffer.
///
/// A frame is accepted when it has the expected length and ends with the sync word.
#[derive(Debug)]
pub struct FrameDeframer {
    length: usize,
    sync_word: u64,
    sync_length: usize,
    synced: bool,
    complete_frames: u64,
    sync_resets: u64,
}

impl FrameDeframer {
    /// `sync_length` is the number of trailing bytes of each frame holding `sync_word`.
    #[must_use]
    pub fn new(length: usize, sync_word: u64, sync_length: usize) -> Self {
        FrameDeframer {
            length,
            sync_word,
            sync_length,
            synced: false,
            complete_frames: 0,
            sync_resets: 0,
        }
    }
}

impl Deframer for FrameDeframer {
    fn process(&mut self, buffer: &Buffer, acceptor: &mut dyn Acceptor) -> Result<()> {
        if buffer.flags.dropped {
            debug!("dropped data before buffer");
            self.synced = false;
        }
        if buffer.flags.bad {
            debug!(len = buffer.data.len(), "discarding bad buffer");
            self.synced = false;
            self.sync_resets += 1;
            return Ok(());
        }

        let data = &buffer.data;
        if data.len() != self.length || self.sync_length > self.length {
            debug!(
                len = data.len(),
                expected = self.length,
                "discarding frame of wrong length"
            );
            self.synced = false;
            self.sync_resets += 1;
            return Ok(());
        }

        let sync = word(&data[self.length - self.sync_length..]);
        if sync != self.sync_word {
            trace!(sync = format!("{sync:x}"), "sync word mismatch");
            self.synced = false;
            return Ok(());
        }

        let resync = buffer.flags.first || !self.synced;
        self.synced = true;
        for (offset, byte) in data.iter().enumerate() {
            acceptor.accept(*byte, &data[..=offset], resync && offset == 0, offset)?;
        }
        self.complete_frames += 1;
        Ok(())
    }

    fn complete_frames(&self) -> u64 {
        self.complete_frames
    }

    fn sync_resets(&self) -> u64 {
        self.sync_resets
    }

    fn state(&self) -> SyncState {
        if self.synced {
            SyncState::Receiving
        } else {
            SyncState::WaitingForSync
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissionConfig;

    const FRAME_LENGTH: usize = MissionConfig::FRAME_LENGTH;
    use crate::framing::Flags;

    fn deframer() -> FrameDeframer {
        FrameDeframer::new(
            FRAME_LENGTH,
            MissionConfig::SYNC_WORD,
            MissionConfig::SYNC_LENGTH,
        )
    }

    fn frame() -> Vec<u8> {
        let mut dat: Vec<u8> = (0..FRAME_LENGTH).map(|i| i as u8).collect();
        dat[FRAME_LENGTH - 5..].copy_from_slice(&[0x12, 0xfc, 0x81, 0x9f, 0xbe]);
        dat
    }

    fn run(deframer: &mut FrameDeframer, buffer: &Buffer) -> Vec<(u8, bool, usize)> {
        let mut accepted = Vec::default();
        let mut acceptor = |byte: u8, frame: &[u8], resync: bool, offset: usize| -> Result<()> {
            assert_eq!(frame.len(), offset + 1);
            accepted.push((byte, resync, offset));
            Ok(())
        };
        deframer.process(buffer, &mut acceptor).unwrap();
        accepted
    }

    #[test]
    fn synced_frame_emits_every_byte() {
        let mut deframer = deframer();

        let accepted = run(&mut deframer, &Buffer::new(frame()));

        assert_eq!(accepted.len(), FRAME_LENGTH);
        assert_eq!(deframer.state(), SyncState::Receiving);
        assert_eq!(deframer.complete_frames(), 1);
        assert_eq!(accepted[10], (10, false, 10));
        assert!(accepted[0].1, "first frame after acquiring sync is a resync");
        assert_eq!(accepted.iter().filter(|(_, resync, _)| *resync).count(), 1);

        let accepted = run(&mut deframer, &Buffer::new(frame()));
        assert!(!accepted[0].1);
    }

    #[test]
    fn altered_sync_byte_is_rejected() {
        let mut deframer = deframer();
        let mut dat = frame();
        dat[FRAME_LENGTH - 1] = 0xbf;

        let accepted = run(&mut deframer, &Buffer::new(dat));

        assert!(accepted.is_empty());
        assert_eq!(deframer.state(), SyncState::WaitingForSync);
        assert_eq!(deframer.sync_resets(), 0);
    }

    #[test]
    fn wrong_length_counts_reset() {
        let mut deframer = deframer();
        run(&mut deframer, &Buffer::new(frame()));

        let accepted = run(&mut deframer, &Buffer::new(vec![0; 127]));

        assert!(accepted.is_empty());
        assert_eq!(deframer.state(), SyncState::WaitingForSync);
        assert_eq!(deframer.sync_resets(), 1);
    }

    #[test]
    fn bad_buffer_is_discarded() {
        let mut deframer = deframer();
        let flags = Flags {
            bad: true,
            ..Flags::default()
        };

        let accepted = run(&mut deframer, &Buffer::new(frame()).with_flags(flags));

        assert!(accepted.is_empty());
        assert_eq!(deframer.sync_resets(), 1);
    }

    #[test]
    fn stream_start_marks_resync() {
        let mut deframer = deframer();
        run(&mut deframer, &Buffer::new(frame()));
        let flags = Flags {
            first: true,
            ..Flags::default()
        };

        let accepted = run(&mut deframer, &Buffer::new(frame()).with_flags(flags));

        assert!(accepted[0].1);
    }

    #[test]
    fn acceptor_error_propagates() {
        let mut deframer = deframer();
        let mut acceptor = |_: u8, _: &[u8], _: bool, offset: usize| -> Result<()> {
            if offset == 3 {
                Err(crate::Error::Dispatch("boom".into()))
            } else {
                Ok(())
            }
        };

        let zult = deframer.process(&Buffer::new(frame()), &mut acceptor);

        assert!(zult.is_err());
        assert_eq!(deframer.complete_frames(), 0);
    }
}
