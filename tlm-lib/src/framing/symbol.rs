use tracing::{debug, trace};

use super::{Acceptor, Buffer, Deframer, SyncState};
use crate::{Error, Result};

/// Set on the symbol at which the receiver correlated the sync word.
const TAG: u8 = 0x2;
const DATA: u8 = 0x1;
/// Each data bit is carried by a pair of symbols.
const SYMBOLS_PER_BIT: usize = 2;

/// Deframer for a continuous stream of tagged symbols, one symbol per input byte.
///
/// The receiver tags the symbol at which it correlated the sync word, which is where the
/// last bit of a frame begins. Bits decode from symbol pairs as `first ^ !second`.
#[derive(Debug)]
pub struct SymbolDeframer {
    length: usize,
    /// The last sync byte without its final bit.
    pre_sync: u8,
    synced: bool,
    newly_synced: bool,
    skip: usize,
    last_symbol: u8,
    symbol_idx: usize,
    byte: u8,
    bit_idx: usize,
    frame: Vec<u8>,
    complete_frames: u64,
    sync_resets: u64,
}

impl SymbolDeframer {
    #[must_use]
    pub fn new(length: usize, sync_word: u64) -> Self {
        SymbolDeframer {
            length,
            pre_sync: sync_word.to_be_bytes()[7] >> 1,
            synced: false,
            newly_synced: false,
            skip: 0,
            last_symbol: 0,
            symbol_idx: 0,
            byte: 0,
            bit_idx: 0,
            frame: Vec::with_capacity(length),
            complete_frames: 0,
            sync_resets: 0,
        }
    }

    fn acquire(&mut self) {
        trace!("acquired sync");
        self.synced = true;
        self.newly_synced = true;
        self.skip = 1;
        self.bit_idx = 0;
        self.byte = 0;
        self.frame.clear();
    }

    /// A tag while synchronized must land on the last bit of a frame.
    fn at_frame_end(&self) -> bool {
        self.frame.len() + 1 == self.length && self.bit_idx == 7 && self.byte == self.pre_sync
    }

    fn push_bit(&mut self, bit: u8, acceptor: &mut dyn Acceptor) -> Result<()> {
        self.byte = (self.byte << 1) | bit;
        self.bit_idx += 1;
        if self.bit_idx < 8 {
            return Ok(());
        }

        self.frame.push(self.byte);
        if self.frame.len() > self.length {
            return Err(Error::Dispatch(format!(
                "assembled {} bytes of a {} byte frame",
                self.frame.len(),
                self.length
            )));
        }
        let offset = self.frame.len() - 1;
        let resync = self.newly_synced;
        self.bit_idx = 0;
        self.byte = 0;
        self.newly_synced = false;
        acceptor.accept(self.frame[offset], &self.frame, resync, offset)?;

        if self.frame.len() == self.length {
            self.complete_frames += 1;
            self.frame.clear();
        }
        Ok(())
    }
}

impl Deframer for SymbolDeframer {
    fn process(&mut self, buffer: &Buffer, acceptor: &mut dyn Acceptor) -> Result<()> {
        if buffer.flags.bad {
            debug!(len = buffer.data.len(), "discarding bad buffer");
            self.synced = false;
            self.skip = 0;
            self.sync_resets += 1;
            return Ok(());
        }
        if buffer.flags.dropped {
            debug!("dropped data before buffer");
            self.synced = false;
            self.skip = 0;
        }

        for symbol in &buffer.data {
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }

            if symbol & TAG == TAG {
                self.symbol_idx = 0;
                if self.synced && !self.at_frame_end() {
                    debug!(
                        len = self.frame.len(),
                        bits = self.bit_idx,
                        "sync tag inside frame"
                    );
                    self.sync_resets += 1;
                    self.synced = false;
                }
                if !self.synced {
                    self.acquire();
                    continue;
                }
            }
            if !self.synced {
                continue;
            }

            let symbol = symbol & DATA;
            if self.symbol_idx != SYMBOLS_PER_BIT - 1 {
                self.last_symbol = symbol;
                self.symbol_idx += 1;
                continue;
            }
            self.symbol_idx = 0;
            self.push_bit(self.last_symbol ^ (!symbol & DATA), acceptor)?;
        }
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

    fn frame(fill: u8) -> Vec<u8> {
        let mut dat = vec![fill; FRAME_LENGTH];
        dat[FRAME_LENGTH - 5..].copy_from_slice(&[0x12, 0xfc, 0x81, 0x9f, 0xbe]);
        dat
    }

    /// Symbols for `frames`, preceded by the tag that first acquires sync.
    fn encode(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut symbols = vec![TAG, 0];
        for frame in frames {
            let bits = frame.len() * 8;
            for i in 0..bits {
                let bit = (frame[i / 8] >> (7 - i % 8)) & 1;
                symbols.push(if i == bits - 1 { TAG } else { 0 });
                symbols.push(1 - bit);
            }
        }
        symbols
    }

    fn run(deframer: &mut SymbolDeframer, buffers: &[Buffer]) -> Vec<(u8, bool, usize)> {
        let mut accepted = Vec::default();
        let mut acceptor = |byte: u8, frame: &[u8], resync: bool, offset: usize| -> Result<()> {
            assert_eq!(frame.len(), offset + 1);
            accepted.push((byte, resync, offset));
            Ok(())
        };
        for buffer in buffers {
            deframer.process(buffer, &mut acceptor).unwrap();
        }
        accepted
    }

    #[test]
    fn decodes_frames_across_buffers() {
        let mut deframer = SymbolDeframer::new(FRAME_LENGTH, MissionConfig::SYNC_WORD);
        let symbols = encode(&[frame(0xa5), frame(0x3c)]);
        let buffers: Vec<Buffer> = symbols
            .chunks(333)
            .map(|chunk| Buffer::new(chunk.to_vec()))
            .collect();

        let accepted = run(&mut deframer, &buffers);

        assert_eq!(accepted.len(), 2 * FRAME_LENGTH);
        assert_eq!(deframer.complete_frames(), 2);
        assert_eq!(deframer.sync_resets(), 0);
        assert_eq!(deframer.state(), SyncState::Receiving);
        let bytes: Vec<u8> = accepted.iter().map(|(b, _, _)| *b).collect();
        assert_eq!(bytes[..FRAME_LENGTH], frame(0xa5)[..]);
        assert_eq!(bytes[FRAME_LENGTH..], frame(0x3c)[..]);
        assert_eq!(accepted[FRAME_LENGTH + 7].2, 7);
        assert!(accepted[0].1);
        assert_eq!(accepted.iter().filter(|(_, resync, _)| *resync).count(), 1);
    }

    #[test]
    fn tag_inside_frame_resets_sync() {
        let mut deframer = SymbolDeframer::new(FRAME_LENGTH, MissionConfig::SYNC_WORD);
        let mut symbols = encode(&[frame(1), frame(2), frame(3)]);
        // first symbol of byte 10 in the second frame
        symbols[2 + FRAME_LENGTH * 16 + 10 * 16] |= TAG;

        let accepted = run(&mut deframer, &[Buffer::new(symbols)]);

        assert_eq!(deframer.sync_resets(), 2);
        assert_eq!(deframer.complete_frames(), 2);
        let last = &accepted[accepted.len() - FRAME_LENGTH..];
        assert!(last[0].1, "reacquired frame starts with a resync");
        assert!(last.iter().take(FRAME_LENGTH - 5).all(|(b, _, _)| *b == 3));
    }

    #[test]
    fn dropped_data_waits_for_tag() {
        let mut deframer = SymbolDeframer::new(FRAME_LENGTH, MissionConfig::SYNC_WORD);
        let symbols = encode(&[frame(1)]);
        run(&mut deframer, &[Buffer::new(symbols[..100].to_vec())]);
        assert_eq!(deframer.state(), SyncState::Receiving);

        let flags = Flags {
            dropped: true,
            ..Flags::default()
        };
        let accepted = run(&mut deframer, &[Buffer::new(vec![1; 64]).with_flags(flags)]);

        assert!(accepted.is_empty());
        assert_eq!(deframer.state(), SyncState::WaitingForSync);
    }

    #[test]
    fn bad_buffer_is_discarded() {
        let mut deframer = SymbolDeframer::new(FRAME_LENGTH, MissionConfig::SYNC_WORD);
        let flags = Flags {
            bad: true,
            ..Flags::default()
        };

        let accepted = run(
            &mut deframer,
            &[Buffer::new(encode(&[frame(1), frame(2)])).with_flags(flags)],
        );

        assert!(accepted.is_empty());
        assert_eq!(deframer.complete_frames(), 0);
        assert_eq!(deframer.sync_resets(), 1);
        assert_eq!(deframer.state(), SyncState::WaitingForSync);
    }
}
