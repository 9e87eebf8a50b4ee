//! # SN Byte-Stream Framer
//!
//! Online frame extraction from an arbitrarily chunked, possibly corrupted
//! serial byte stream.
//!
//! Every byte handed to [`SnFramer::append_bytes`] ends up in exactly one of:
//! - a CRC-validated [`Frame`] passed to the [`FrameSink`]
//! - a single garbage byte (or a timeout flush) passed to the [`RawSink`]
//! - the receive buffer, waiting for more data or a timeout

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::crc::Crc8;
use super::protocol::{expected_frame_length, is_valid_protocol_id, Frame, SN_RECEIVE_BUFFER_SIZE};
use crate::config::FramerConfig;

/// Destination of validated frames
pub trait FrameSink {
    fn forward_frame(&mut self, frame: &Frame);
}

/// Destination of bytes that are not part of any frame
pub trait RawSink {
    fn deliver_raw(&mut self, bytes: &[u8]);
}

/// Diagnostic counters, not used for any framing decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub frame_count: u64,
    pub crc_error_count: u64,
    pub timeout_count: u64,
    pub garbage_byte_count: u64,
}

/// Fixed-capacity receive buffer
///
/// Invariant: `read_index <= size <= SN_RECEIVE_BUFFER_SIZE`.
struct ReceiveBuffer {
    data: [u8; SN_RECEIVE_BUFFER_SIZE],
    read_index: usize,
    size: usize,
}

impl ReceiveBuffer {
    fn new() -> Self {
        Self {
            data: [0u8; SN_RECEIVE_BUFFER_SIZE],
            read_index: 0,
            size: 0,
        }
    }

    fn unconsumed(&self) -> &[u8] {
        &self.data[self.read_index..self.size]
    }

    fn free_space(&self) -> usize {
        SN_RECEIVE_BUFFER_SIZE - self.size
    }

    fn clear(&mut self) {
        self.read_index = 0;
        self.size = 0;
    }

    /// Move the unconsumed tail to offset 0
    fn compact(&mut self) {
        self.data.copy_within(self.read_index..self.size, 0);
        self.size -= self.read_index;
        self.read_index = 0;
    }

    /// Append as much of `chunk` as fits, returning the number of bytes taken
    fn fill(&mut self, chunk: &[u8]) -> usize {
        let n = chunk.len().min(self.free_space());
        self.data[self.size..self.size + n].copy_from_slice(&chunk[..n]);
        self.size += n;
        n
    }
}

/// A located protocol ID awaiting enough bytes for validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameCandidate {
    start: usize,
    end: usize,
    expected_length: usize,
}

/// SN stream framer
///
/// Must be fed from a single sequential caller; it holds no locks.
pub struct SnFramer<F: FrameSink, R: RawSink> {
    buffer: ReceiveBuffer,
    candidate: Option<FrameCandidate>,
    crc: Crc8,
    frame_timeout: Duration,
    last_frame_at: Instant,
    stats: FramerStats,
    frame_sink: F,
    raw_sink: R,
}

impl<F: FrameSink, R: RawSink> std::fmt::Debug for SnFramer<F, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnFramer")
            .field("read_index", &self.buffer.read_index)
            .field("size", &self.buffer.size)
            .field("candidate", &self.candidate)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<F: FrameSink, R: RawSink> SnFramer<F, R> {
    /// Create a framer forwarding frames to `frame_sink` and noise to `raw_sink`
    pub fn new(config: &FramerConfig, frame_sink: F, raw_sink: R) -> Self {
        Self {
            buffer: ReceiveBuffer::new(),
            candidate: None,
            crc: Crc8::default(),
            frame_timeout: Duration::from_millis(config.frame_timeout_ms),
            last_frame_at: Instant::now(),
            stats: FramerStats::default(),
            frame_sink,
            raw_sink,
        }
    }

    /// Feed a chunk of serial bytes
    ///
    /// Never fails and never blocks. Empty chunks are ignored.
    pub fn append_bytes(&mut self, chunk: &[u8]) {
        self.append_bytes_at(chunk, Instant::now());
    }

    /// Same as [`append_bytes`](Self::append_bytes) with an explicit arrival time
    pub fn append_bytes_at(&mut self, chunk: &[u8], now: Instant) {
        if chunk.is_empty() {
            return;
        }

        if now.saturating_duration_since(self.last_frame_at) > self.frame_timeout {
            self.reset_on_timeout(now);
        }

        let mut rest = chunk;
        while !rest.is_empty() {
            if self.buffer.free_space() < rest.len() {
                self.compact();
            }

            let taken = self.buffer.fill(rest);
            rest = &rest[taken..];

            while self.process(now) {}
        }
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Bytes received but not yet classified
    pub fn buffered_len(&self) -> usize {
        self.buffer.size - self.buffer.read_index
    }

    pub fn frame_sink(&self) -> &F {
        &self.frame_sink
    }

    pub fn raw_sink(&self) -> &R {
        &self.raw_sink
    }

    fn reset_on_timeout(&mut self, now: Instant) {
        if !self.buffer.unconsumed().is_empty() {
            self.raw_sink.deliver_raw(self.buffer.unconsumed());
        }
        let dropped = self.buffered_len();

        self.buffer.clear();
        self.candidate = None;
        self.last_frame_at = now;
        self.stats.timeout_count += 1;

        warn!("Frame timeout, flushed {} buffered bytes", dropped);
    }

    /// Discard already classified bytes to make room at the end
    fn compact(&mut self) {
        trace!(
            "Compacting receive buffer (read_index {}, size {})",
            self.buffer.read_index,
            self.buffer.size
        );

        self.buffer.compact();
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.start = 0;
            candidate.end = candidate.expected_length;
        }
    }

    /// One scan + validate step; returns true if a candidate was resolved
    fn process(&mut self, now: Instant) -> bool {
        if self.candidate.is_none() {
            self.scan_for_marker();
        }

        let Some(candidate) = self.candidate else {
            return false;
        };
        if self.buffer.size < candidate.end {
            return false;
        }

        let received = self.buffer.data[candidate.end - 1];
        let calculated = self
            .crc
            .checksum(&self.buffer.data, candidate.start, candidate.end - 1);

        if matches!(calculated, Ok(crc) if crc == received) {
            let frame = Frame::from_validated(&self.buffer.data[candidate.start..candidate.end]);
            self.buffer.read_index = candidate.end;
            self.stats.frame_count += 1;
            self.last_frame_at = now;

            trace!("SN frame [{}]", frame.to_hex(16));
            self.frame_sink.forward_frame(&frame);
        } else {
            self.stats.crc_error_count += 1;
            debug!(
                "CRC mismatch for ID 0x{:02X}: expected {:02X?}, got 0x{:02X}",
                self.buffer.data[candidate.start], calculated, received
            );

            self.emit_garbage(candidate.start);
        }

        self.candidate = None;
        true
    }

    /// Drain non-marker bytes until a protocol ID or the end of data
    fn scan_for_marker(&mut self) {
        while self.buffer.read_index < self.buffer.size {
            let index = self.buffer.read_index;
            let id = self.buffer.data[index];

            if is_valid_protocol_id(id) {
                let expected_length = expected_frame_length(id);
                self.candidate = Some(FrameCandidate {
                    start: index,
                    end: index + expected_length,
                    expected_length,
                });
                return;
            }

            self.emit_garbage(index);
        }
    }

    /// Hand the single byte at `index` to the raw sink and step past it
    fn emit_garbage(&mut self, index: usize) {
        self.raw_sink.deliver_raw(&self.buffer.data[index..index + 1]);
        self.buffer.read_index += 1;
        self.stats.garbage_byte_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectFrames(Vec<Frame>);

    impl FrameSink for CollectFrames {
        fn forward_frame(&mut self, frame: &Frame) {
            self.0.push(frame.clone());
        }
    }

    /// Records each raw delivery separately
    #[derive(Default)]
    struct CollectRaw(Vec<Vec<u8>>);

    impl RawSink for CollectRaw {
        fn deliver_raw(&mut self, bytes: &[u8]) {
            self.0.push(bytes.to_vec());
        }
    }

    impl CollectRaw {
        fn flat(&self) -> Vec<u8> {
            self.0.concat()
        }
    }

    fn framer() -> SnFramer<CollectFrames, CollectRaw> {
        SnFramer::new(
            &FramerConfig::default(),
            CollectFrames::default(),
            CollectRaw::default(),
        )
    }

    fn frame_0x90() -> Frame {
        let payload: Vec<u8> = (0x00..0x11).collect();
        Frame::encode(0x90, &payload).unwrap()
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let mut framer = framer();
        framer.append_bytes(&[]);
        assert_eq!(framer.stats(), FramerStats::default());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_single_frame_roundtrip() {
        let mut framer = framer();
        let frame = Frame::encode(0x81, &[0x01, 0x02]).unwrap();

        framer.append_bytes(frame.as_bytes());

        assert_eq!(framer.frame_sink().0, vec![frame]);
        assert_eq!(framer.stats().frame_count, 1);
        assert_eq!(framer.stats().crc_error_count, 0);
        assert!(framer.raw_sink().0.is_empty());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_garbage_then_frame_0x90() {
        let mut framer = framer();
        let frame = frame_0x90();
        assert_eq!(frame.len(), 19);

        let mut stream = vec![0x12, 0x7F];
        stream.extend_from_slice(frame.as_bytes());
        framer.append_bytes(&stream);

        assert_eq!(framer.raw_sink().0, vec![vec![0x12], vec![0x7F]]);
        assert_eq!(framer.frame_sink().0.len(), 1);
        assert_eq!(framer.frame_sink().0[0].as_bytes(), frame.as_bytes());
        assert_eq!(framer.stats().frame_count, 1);
    }

    #[test]
    fn test_frame_split_at_every_boundary() {
        let frame = frame_0x90();
        let bytes = frame.as_bytes();

        for split in 1..bytes.len() {
            let mut framer = framer();
            framer.append_bytes(&bytes[..split]);
            assert!(framer.frame_sink().0.is_empty(), "split {}", split);
            assert_eq!(framer.buffered_len(), split);

            framer.append_bytes(&bytes[split..]);
            assert_eq!(framer.frame_sink().0, vec![frame.clone()], "split {}", split);
            assert!(framer.raw_sink().0.is_empty());
        }
    }

    #[test]
    fn test_frame_fed_byte_by_byte() {
        let mut framer = framer();
        let frame = frame_0x90();

        for byte in frame.as_bytes() {
            framer.append_bytes(&[*byte]);
        }

        assert_eq!(framer.frame_sink().0, vec![frame]);
        assert_eq!(framer.stats().crc_error_count, 0);
    }

    #[test]
    fn test_crc_corruption_resyncs_on_next_frame() {
        let mut framer = framer();
        let mut corrupted = frame_0x90().as_bytes().to_vec();
        corrupted[5] ^= 0x01;
        let good = Frame::encode(0x81, &[0x01, 0x02]).unwrap();

        let mut stream = corrupted.clone();
        stream.extend_from_slice(good.as_bytes());
        framer.append_bytes(&stream);

        assert_eq!(framer.stats().crc_error_count, 1);
        assert_eq!(framer.stats().frame_count, 1);
        assert_eq!(framer.frame_sink().0, vec![good]);

        // The bad marker, then the rest of the corrupted frame as noise
        assert_eq!(framer.raw_sink().0[0], vec![0x90]);
        assert_eq!(framer.raw_sink().flat(), corrupted);
    }

    #[test]
    fn test_timeout_flushes_partial_frame() {
        let mut framer = framer();
        let frame = frame_0x90();
        let t0 = Instant::now();

        framer.append_bytes_at(&frame.as_bytes()[..7], t0);
        assert_eq!(framer.buffered_len(), 7);

        framer.append_bytes_at(&[0x01], t0 + Duration::from_millis(1500));

        assert_eq!(framer.stats().timeout_count, 1);
        assert_eq!(framer.raw_sink().0[0], frame.as_bytes()[..7].to_vec());
        assert_eq!(framer.raw_sink().0[1], vec![0x01]);
        assert_eq!(framer.buffered_len(), 0);
        assert!(framer.frame_sink().0.is_empty());
    }

    #[test]
    fn test_no_timeout_within_window() {
        let mut framer = framer();
        let frame = frame_0x90();
        let t0 = Instant::now();

        framer.append_bytes_at(&frame.as_bytes()[..7], t0);
        framer.append_bytes_at(&frame.as_bytes()[7..], t0 + Duration::from_millis(900));

        assert_eq!(framer.stats().timeout_count, 0);
        assert_eq!(framer.frame_sink().0, vec![frame]);
    }

    #[test]
    fn test_timeout_window_restarts_after_frame() {
        let mut framer = framer();
        let frame = Frame::encode(0x81, &[0x01, 0x02]).unwrap();
        let t0 = Instant::now();

        framer.append_bytes_at(frame.as_bytes(), t0 + Duration::from_millis(800));
        framer.append_bytes_at(frame.as_bytes(), t0 + Duration::from_millis(1600));

        assert_eq!(framer.stats().timeout_count, 0);
        assert_eq!(framer.stats().frame_count, 2);
    }

    #[test]
    fn test_overflow_compacts_without_losing_frames() {
        let mut framer = framer();
        let frame = Frame::encode(0x81, &[0x01, 0x02]).unwrap();

        // 300 frames (1200 bytes) in chunks of 37, so frames straddle
        // chunk boundaries
        let stream: Vec<u8> = frame.as_bytes().repeat(300);
        for chunk in stream.chunks(37) {
            framer.append_bytes(chunk);
        }

        assert_eq!(framer.stats().frame_count, 300);
        assert!(framer.raw_sink().0.is_empty());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_overflow_rebases_pending_candidate() {
        let mut framer = framer();
        let frame = frame_0x90();

        // Fill the buffer close to capacity with noise, then start a frame
        framer.append_bytes(&vec![0x00; SN_RECEIVE_BUFFER_SIZE - 5]);
        framer.append_bytes(&frame.as_bytes()[..4]);
        assert_eq!(framer.buffered_len(), 4);

        framer.append_bytes(&frame.as_bytes()[4..]);

        assert_eq!(framer.frame_sink().0, vec![frame]);
        assert_eq!(framer.stats().garbage_byte_count, (SN_RECEIVE_BUFFER_SIZE - 5) as u64);
    }

    #[test]
    fn test_chunk_larger_than_buffer() {
        let mut framer = framer();
        let frame = frame_0x90();

        let mut stream = vec![0x20; 3000];
        stream.extend_from_slice(frame.as_bytes());
        framer.append_bytes(&stream);

        assert_eq!(framer.stats().garbage_byte_count, 3000);
        assert_eq!(framer.frame_sink().0, vec![frame]);
    }

    #[test]
    fn test_every_byte_classified_once() {
        let mut framer = framer();
        let good = Frame::encode(0x83, &[0xC0, 0x81, 0x7F, 0x10]).unwrap();
        let mut bad = good.as_bytes().to_vec();
        bad[2] ^= 0x80;

        let mut stream = vec![0xFF, 0x00];
        stream.extend_from_slice(&bad);
        stream.extend_from_slice(good.as_bytes());
        stream.extend_from_slice(&[0x85, 0x01]); // partial frame left pending

        for chunk in stream.chunks(3) {
            framer.append_bytes(chunk);
        }

        let framed: usize = framer.frame_sink().0.iter().map(Frame::len).sum();
        let garbage = framer.raw_sink().flat().len();
        assert_eq!(framed + garbage + framer.buffered_len(), stream.len());
        assert_eq!(framer.buffered_len(), 2);
        assert!(framer.frame_sink().0.contains(&good));
    }

    #[test]
    fn test_marker_only_bytes_stay_buffered() {
        let mut framer = framer();
        framer.append_bytes(&[0xBF]);

        assert_eq!(framer.buffered_len(), 1);
        assert!(framer.raw_sink().0.is_empty());
        assert_eq!(framer.stats().crc_error_count, 0);
    }
}
