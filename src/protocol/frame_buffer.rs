//! Streaming decoder turning raw scale bytes into weight readings.
//!
//! Uses `bytes::BytesMut` for buffer management. Chunks arrive at arbitrary
//! boundaries; the decoder resynchronizes on the `ST` start marker and
//! silently drops anything that does not form a valid frame.
//!
//! # Example
//!
//! ```
//! use scale_link::protocol::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new();
//!
//! assert!(decoder.feed(b"ST______006.").is_empty());
//! let readings = decoder.feed(b"20kg\r\n");
//!
//! assert_eq!(readings.len(), 1);
//! assert_eq!(readings[0].display(), "012.4");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{classify_frame, FrameOutcome, FRAME_SIZE, START_MARKER};
use super::WeightReading;

/// Counters describing what the decoder has seen since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames decoded into readings.
    pub readings: u64,
    /// Frames with a valid terminator but a non-numeric weight field.
    pub malformed: u64,
    /// Candidate windows rejected for a bad terminator.
    pub noise: u64,
    /// Bytes thrown away while searching for a start marker.
    pub discarded_bytes: u64,
}

/// Buffer accumulating device bytes and extracting weight readings.
///
/// Holds at most one pending partial frame; garbage in front of it is
/// consumed as soon as a marker is located.
pub struct FrameDecoder {
    /// Bytes received but not yet resolved into a frame or garbage.
    buffer: BytesMut,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * FRAME_SIZE),
            stats: DecoderStats::default(),
        }
    }

    /// Append a chunk and extract every complete reading, in arrival order.
    ///
    /// Malformed content never fails; it is dropped and counted.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<WeightReading> {
        self.buffer.extend_from_slice(chunk);

        let mut readings = Vec::new();
        while self.buffer.len() >= FRAME_SIZE {
            match self.try_extract_one() {
                Step::Reading(reading) => readings.push(reading),
                Step::Dropped => {}
                Step::NeedMore => break,
            }
        }

        readings
    }

    /// Resolve the window at the front of the buffer.
    fn try_extract_one(&mut self) -> Step {
        let Some(pos) = find_marker(&self.buffer) else {
            self.discard_all();
            return Step::NeedMore;
        };

        if pos > 0 {
            self.discard(pos);
        }

        if self.buffer.len() < FRAME_SIZE {
            return Step::NeedMore;
        }

        let mut window = [0u8; FRAME_SIZE];
        window.copy_from_slice(&self.buffer[..FRAME_SIZE]);

        match classify_frame(&window) {
            FrameOutcome::Reading(tenths) => {
                self.buffer.advance(FRAME_SIZE);
                self.stats.readings += 1;
                Step::Reading(WeightReading::new(tenths))
            }
            FrameOutcome::Malformed => {
                self.buffer.advance(FRAME_SIZE);
                self.stats.malformed += 1;
                tracing::debug!("Dropping frame with non-numeric weight field");
                Step::Dropped
            }
            FrameOutcome::BadTerminator => {
                // Only the bogus marker is consumed; a real frame may start inside the window.
                self.buffer.advance(START_MARKER.len());
                self.stats.noise += 1;
                tracing::debug!("Dropping candidate frame with bad terminator");
                Step::Dropped
            }
        }
    }

    /// Throw away a buffer with no start marker.
    ///
    /// A trailing `S` may be the first half of a marker split across chunks.
    fn discard_all(&mut self) {
        let keep = usize::from(self.buffer.last() == Some(&START_MARKER[0]));
        let drop = self.buffer.len() - keep;
        self.discard(drop);
    }

    fn discard(&mut self, count: usize) {
        self.buffer.advance(count);
        self.stats.discarded_bytes += count as u64;
        tracing::debug!("Discarded {} bytes of line noise", count);
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Counters since construction or the last reset.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Clear the buffer and counters.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stats = DecoderStats::default();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one extraction attempt.
enum Step {
    Reading(WeightReading),
    Dropped,
    NeedMore,
}

fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(START_MARKER.len())
        .position(|w| w == START_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;

    fn values(readings: &[WeightReading]) -> Vec<f64> {
        readings.iter().map(WeightReading::value).collect()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = FrameDecoder::new();

        let readings = decoder.feed(b"ST______006.20kg\r\n");

        assert_eq!(values(&readings), vec![12.4]);
        assert!(decoder.is_empty());
        assert_eq!(decoder.stats().readings, 1);
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut decoder = FrameDecoder::new();

        let mut combined = Vec::new();
        for value in ["1.00", "2.50", "3.10", "0.05"] {
            combined.extend_from_slice(&encode_frame(b"GS,NT,", value));
        }

        let readings = decoder.feed(&combined);

        assert_eq!(values(&readings), vec![2.0, 5.0, 6.2, 0.1]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_split_across_two_chunks() {
        let mut decoder = FrameDecoder::new();

        assert!(decoder.feed(b"ST______006.").is_empty());
        assert_eq!(decoder.len(), 12);

        let readings = decoder.feed(b"20kg\r\nST______003.10kg\r\n");
        assert_eq!(values(&readings), vec![12.4, 6.2]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_split_at_every_boundary() {
        let frame = encode_frame(b"______", "6.20");

        for split in 1..FRAME_SIZE {
            let mut decoder = FrameDecoder::new();
            let mut readings = decoder.feed(&frame[..split]);
            readings.extend(decoder.feed(&frame[split..]));

            assert_eq!(values(&readings), vec![12.4], "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = FrameDecoder::new();
        let mut stream = b"\x00\x13garbage".to_vec();
        stream.extend_from_slice(&encode_frame(b"______", "1.5"));
        stream.extend_from_slice(&encode_frame(b"______", "2.5"));

        let mut all = Vec::new();
        for byte in &stream {
            all.extend(decoder.feed(&[*byte]));
        }

        assert_eq!(values(&all), vec![3.0, 5.0]);
    }

    #[test]
    fn test_garbage_without_marker_is_discarded() {
        let mut decoder = FrameDecoder::new();
        let garbage = [0x55u8; 40];

        for _ in 0..10 {
            assert!(decoder.feed(&garbage).is_empty());
            assert!(decoder.is_empty());
        }
        assert_eq!(decoder.stats().discarded_bytes, 400);
    }

    #[test]
    fn test_short_garbage_waits_for_more_data() {
        let mut decoder = FrameDecoder::new();

        assert!(decoder.feed(b"noise").is_empty());
        assert_eq!(decoder.len(), 5);
    }

    #[test]
    fn test_marker_split_after_garbage() {
        let mut decoder = FrameDecoder::new();

        // 20 bytes of noise ending in the first half of a marker
        assert!(decoder.feed(b"0123456789abcdefghiS").is_empty());
        assert_eq!(decoder.len(), 1);

        let readings = decoder.feed(b"T______006.20kg\r\n");
        assert_eq!(values(&readings), vec![12.4]);
    }

    #[test]
    fn test_prefix_garbage_before_frame() {
        let mut decoder = FrameDecoder::new();

        let readings = decoder.feed(b"xx\r\nST______006.20kg\r\n");

        assert_eq!(values(&readings), vec![12.4]);
        assert_eq!(decoder.stats().discarded_bytes, 4);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut decoder = FrameDecoder::new();

        assert!(decoder.feed(b"ST______XXXXXXkg\r\n").is_empty());
        assert!(decoder.is_empty());
        assert_eq!(decoder.stats().malformed, 1);

        let readings = decoder.feed(b"ST______006.20kg\r\n");
        assert_eq!(values(&readings), vec![12.4]);
    }

    #[test]
    fn test_bad_terminator_resumes_after_marker() {
        let mut decoder = FrameDecoder::new();

        // Truncated frame immediately followed by a real one
        let mut stream = b"ST______00".to_vec();
        stream.extend_from_slice(b"ST______006.20kg\r\n");

        let readings = decoder.feed(&stream);

        assert_eq!(values(&readings), vec![12.4]);
        assert_eq!(decoder.stats().noise, 1);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_bad_terminator_without_following_frame() {
        let mut decoder = FrameDecoder::new();

        assert!(decoder.feed(b"ST______006.20lb\r\n").is_empty());
        assert_eq!(decoder.stats().noise, 1);

        let readings = decoder.feed(b"ST______003.10kg\r\n");
        assert_eq!(values(&readings), vec![6.2]);
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut decoder = FrameDecoder::new();

        // Enough bytes to attempt extraction, but the marker sits near the end
        let readings = decoder.feed(b"0123456789abcdefST____");
        assert!(readings.is_empty());
        assert_eq!(decoder.len(), 6);

        let readings = decoder.feed(b"__006.20kg\r\n");
        assert_eq!(values(&readings), vec![12.4]);
    }

    #[test]
    fn test_restart_yields_identical_sequence() {
        let chunks: [&[u8]; 3] = [
            b"ST______001.00kg\r\nST___",
            b"___002.00kg\r\nST______0",
            b"03.00kg\r\n",
        ];

        let mut decoder = FrameDecoder::new();
        let first: Vec<i64> = chunks
            .iter()
            .flat_map(|c| decoder.feed(c))
            .map(|r| r.tenths)
            .collect();

        decoder.reset();
        assert!(decoder.is_empty());
        assert_eq!(decoder.stats(), DecoderStats::default());

        let second: Vec<i64> = chunks
            .iter()
            .flat_map(|c| decoder.feed(c))
            .map(|r| r.tenths)
            .collect();

        assert_eq!(first, vec![20, 40, 60]);
        assert_eq!(first, second);
    }
}
