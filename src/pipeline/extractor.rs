//! Image frame extraction from the transcoder byte stream
//!
//! The transcoder emits an unbounded concatenation of JPEG images on its
//! stdout. Frames are delimited by the two-byte start-of-image and
//! end-of-image markers; both markers belong to the frame. The extractor
//! buffers incoming chunks and cuts complete frames out, with two limits
//! that bound memory on malformed input.

use bytes::{Buf, Bytes, BytesMut};

/// Start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// End-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Buffer is reset when it grows past this without a start marker.
const NO_START_RESET: usize = 2 * 1024 * 1024;
/// Bytes before the start marker are discarded when an unfinished frame
/// grows past this.
const UNFINISHED_COMPACT: usize = 8 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 512 * 1024;

/// Incremental frame splitter over the transcoder output stream.
#[derive(Debug)]
pub struct FrameExtractor {
    buf: BytesMut,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append a chunk and return every frame completed by it, in stream
    /// order. Each frame is an independent allocation including both
    /// markers.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let Some(start) = find_marker(&self.buf, &SOI) else {
                if self.buf.len() > NO_START_RESET {
                    self.buf.clear();
                }
                break;
            };

            let Some(end_offset) = find_marker(&self.buf[start..], &EOI) else {
                if self.buf.len() > UNFINISHED_COMPACT {
                    self.buf.advance(start);
                }
                break;
            };

            let end = start + end_offset + EOI.len();
            frames.push(Bytes::copy_from_slice(&self.buf[start..end]));
            self.buf.advance(end);
        }
        frames
    }

    /// Bytes currently buffered awaiting a frame boundary.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = SOI.to_vec();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&EOI);
        bytes
    }

    #[test]
    fn test_two_concatenated_frames() {
        let first = frame(b"alpha");
        let second = frame(b"beta");
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut extractor = FrameExtractor::new();
        let frames = extractor.push(&stream);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), first.as_slice());
        assert_eq!(frames[1].as_ref(), second.as_slice());
        assert_eq!(extractor.buffered(), 0);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let full = frame(b"split across reads");
        let mut extractor = FrameExtractor::new();

        let (head, tail) = full.split_at(5);
        assert!(extractor.push(head).is_empty());
        let frames = extractor.push(tail);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), full.as_slice());
    }

    #[test]
    fn test_garbage_before_frame_is_skipped() {
        let mut stream = b"noise without markers".to_vec();
        let full = frame(b"payload");
        stream.extend_from_slice(&full);

        let mut extractor = FrameExtractor::new();
        let frames = extractor.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), full.as_slice());
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let full = frame(b"x");
        let mut extractor = FrameExtractor::new();

        // Break inside the end marker itself.
        let cut = full.len() - 1;
        assert!(extractor.push(&full[..cut]).is_empty());
        let frames = extractor.push(&full[cut..]);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), full.as_slice());
    }

    #[test]
    fn test_reset_without_start_marker() {
        let mut extractor = FrameExtractor::new();

        let junk = vec![0u8; NO_START_RESET + 1];
        assert!(extractor.push(&junk).is_empty());
        assert_eq!(extractor.buffered(), 0);

        // Still usable afterwards.
        let full = frame(b"after reset");
        let frames = extractor.push(&full);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), full.as_slice());
    }

    #[test]
    fn test_unfinished_frame_compacts_leading_garbage() {
        let mut extractor = FrameExtractor::new();

        let garbage_len = 1024;
        let mut stream = vec![0u8; garbage_len];
        stream.extend_from_slice(&SOI);
        stream.extend_from_slice(&vec![1u8; UNFINISHED_COMPACT]);
        assert!(extractor.push(&stream).is_empty());

        // Everything before the start marker is gone, the partial frame
        // is retained.
        assert_eq!(extractor.buffered(), stream.len() - garbage_len);

        let frames = extractor.push(&EOI);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..2], &SOI);
        assert_eq!(&frames[0][frames[0].len() - 2..], &EOI);
    }

    #[test]
    fn test_below_limits_nothing_is_discarded() {
        let mut extractor = FrameExtractor::new();

        let mut partial = SOI.to_vec();
        partial.extend_from_slice(&[0u8; 4096]);
        assert!(extractor.push(&partial).is_empty());
        assert_eq!(extractor.buffered(), partial.len());
    }
}
