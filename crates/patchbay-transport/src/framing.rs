//! Delimiter framing for stream sockets
//!
//! Every envelope is written as `DELIM payload DELIM`. The reader splits the
//! byte stream on the delimiter, skips empty segments (the gap between two
//! adjacent frames), and buffers incomplete tails until more bytes arrive.

use bytes::{Buf, Bytes, BytesMut};
use patchbay_core::{FRAME_DELIMITER, MAX_FRAME_SIZE};
use tracing::warn;

/// Wrap a payload in frame delimiters
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 2);
    frame.extend_from_slice(&[FRAME_DELIMITER]);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[FRAME_DELIMITER]);
    frame.freeze()
}

/// Incremental frame splitter
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
    /// Set while skipping the remainder of an oversized frame
    discarding: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8192),
            max_frame_size,
            discarding: false,
        }
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mutable access to the read buffer, for `read_buf` style readers
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == FRAME_DELIMITER) else {
                if self.buf.len() > self.max_frame_size {
                    warn!(
                        "Discarding oversized frame ({} bytes buffered, max {})",
                        self.buf.len(),
                        self.max_frame_size
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                return None;
            };

            let segment = self.buf.split_to(pos);
            self.buf.advance(1);

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if segment.is_empty() {
                continue;
            }
            if segment.len() > self.max_frame_size {
                warn!(
                    "Discarding oversized frame ({} > {})",
                    segment.len(),
                    self.max_frame_size
                );
                continue;
            }
            return Some(segment.freeze());
        }
    }

    /// Bytes held back waiting for a closing delimiter
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
