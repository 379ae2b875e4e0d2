//! Buffer sources.
//!
//! Recorded telemetry is read into [Buffer]s either one minor frame at a time, for recordings
//! made after an upstream frame synchronizer, or as fixed-size runs of tagged symbols. A source
//! can be moved onto its own thread with [spawn] and consumed through a bounded channel.
use std::io::{ErrorKind, Read};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, warn};

use crate::framing::{Buffer, Flags};
use crate::Result;

/// Buffers the source thread may get ahead of the engine by.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Reads fixed-size chunks from a reader.
///
/// The first buffer is flagged as the start of a stream. Input ending mid-chunk yields a
/// short final buffer flagged as the end of the stream.
pub struct Chunks<R> {
    reader: R,
    size: usize,
    count: u64,
    done: bool,
}

impl<R: Read> Chunks<R> {
    #[must_use]
    pub fn new(reader: R, size: usize) -> Self {
        Chunks {
            reader,
            size,
            count: 0,
            done: false,
        }
    }

    /// Fill `buf`, returning how many bytes were read before end of input.
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = Result<Buffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.size == 0 {
            return None;
        }
        let mut data = vec![0u8; self.size];
        let n = match self.fill(&mut data) {
            Ok(n) => n,
            Err(err) => {
                self.done = true;
                return Some(Err(err.into()));
            }
        };
        if n == 0 {
            self.done = true;
            return None;
        }
        if n < self.size {
            debug!(len = n, expected = self.size, "short read at end of input");
            data.truncate(n);
            self.done = true;
        }

        let flags = Flags {
            first: self.count == 0,
            last: self.done,
            ..Flags::default()
        };
        self.count += 1;
        Some(Ok(Buffer::new(data).with_flags(flags)))
    }
}

/// One buffer per minor frame of `frame_length` bytes.
pub fn read_frames<R: Read>(reader: R, frame_length: usize) -> Chunks<R> {
    Chunks::new(reader, frame_length)
}

/// Buffers of up to `chunk_size` symbols, one symbol per byte.
pub fn read_symbols<R: Read>(reader: R, chunk_size: usize) -> Chunks<R> {
    Chunks::new(reader, chunk_size)
}

/// Run `source` on its own thread, handing its buffers over a channel holding at most
/// `capacity` of them.
///
/// The thread stops at the end of the source, on the first read error, or once the receiver
/// is dropped. Its result carries the read error, if any.
///
/// # Errors
/// If the thread cannot be spawned.
pub fn spawn<I>(source: I, capacity: usize) -> Result<(Receiver<Buffer>, JoinHandle<Result<()>>)>
where
    I: IntoIterator<Item = Result<Buffer>>,
    I::IntoIter: Send + 'static,
{
    let (tx, rx) = bounded(capacity);
    let source = source.into_iter();
    let handle = thread::Builder::new()
        .name("tlm_source".into())
        .spawn(move || {
            for zult in source {
                let buffer = match zult {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        warn!("source failed: {err}");
                        return Err(err);
                    }
                };
                if tx.send(buffer).is_err() {
                    debug!("buffer receiver dropped");
                    break;
                }
            }
            Ok(())
        })?;
    Ok((rx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_flag_stream_ends() {
        let dat: Vec<u8> = (0..10).collect();

        let buffers: Vec<Buffer> = read_frames(Cursor::new(dat), 4)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[0].data, vec![0, 1, 2, 3]);
        assert!(buffers[0].flags.first);
        assert!(!buffers[1].flags.first);
        assert_eq!(buffers[2].data, vec![8, 9]);
        assert!(buffers[2].flags.last);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let buffers: Vec<Buffer> = read_symbols(Cursor::new(vec![1u8; 8]), 4)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(buffers.len(), 2);
    }

    #[test]
    fn spawned_source_delivers_in_order() {
        let dat: Vec<u8> = (0..=255).collect();
        let (rx, handle) = spawn(read_frames(Cursor::new(dat), 16), 2).unwrap();

        let firsts: Vec<u8> = rx.iter().map(|b| b.data[0]).collect();

        assert_eq!(firsts, (0..16).map(|i| i * 16).collect::<Vec<u8>>());
        handle.join().unwrap().unwrap();
    }
}
