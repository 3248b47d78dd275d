//! Stream reassembly for byte-oriented transports.
//!
//! The board receives protocol bytes over a serial/DMA link that splits
//! and merges frames at arbitrary boundaries and may interleave line
//! noise. [`StreamReassembler`] buffers whatever arrives and extracts
//! every validated frame it can, resynchronizing on the 0xAA 0x55
//! marker after corruption.
//!
//! A datagram transport delivers whole frames and does not need this
//! layer; the host decodes datagrams with [`Frame::decode`] directly.

use heapless::Vec;

use crate::frame::{
    declared_total_len, Frame, FrameError, MAX_FRAME_LEN, MIN_FRAME_LEN, PROTOCOL_VERSION,
};

/// Receive window capacity in bytes.
///
/// Sized to hold several frames plus noise between them. On overflow
/// the oldest bytes are dropped: commands are periodic, so freshness
/// beats completeness.
pub const RX_WINDOW_CAPACITY: usize = 512;

/// One step of the scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanEvent {
    /// A validated frame was extracted from the window.
    Frame(Frame),
    /// Bytes were dropped while hunting for the next frame boundary.
    ///
    /// `cause` is the decode failure that forced the skip; noise in
    /// front of a marker reports as [`FrameError::BadStartMarker`]. An
    /// [`FrameError::UnsupportedKind`] skip covers a whole checksummed
    /// frame, every other cause drops exactly one byte so that a valid
    /// frame hiding behind the damage is still found.
    Skipped { bytes: usize, cause: FrameError },
}

/// Sliding-window reassembler over an unreliable byte stream.
#[derive(Debug, Clone, Default)]
pub struct StreamReassembler {
    window: Vec<u8, RX_WINDOW_CAPACITY>,
}

impl StreamReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self { window: Vec::new() }
    }

    /// Append freshly received bytes to the window.
    ///
    /// Never fails: when the new bytes do not fit, the oldest buffered
    /// bytes are discarded first, and input larger than the whole
    /// window keeps only its tail.
    pub fn extend(&mut self, bytes: &[u8]) {
        if bytes.len() >= RX_WINDOW_CAPACITY {
            self.window.clear();
            let tail = &bytes[bytes.len() - RX_WINDOW_CAPACITY..];
            // Cannot fail: tail length equals the window capacity.
            let _ = self.window.extend_from_slice(tail);
            return;
        }

        let spill = (self.window.len() + bytes.len()).saturating_sub(RX_WINDOW_CAPACITY);
        if spill > 0 {
            self.discard(spill);
        }
        let _ = self.window.extend_from_slice(bytes);
    }

    /// Advance the scan by one event.
    ///
    /// Returns `None` when the window holds no complete frame and no
    /// bytes can be ruled out yet; call again after the next
    /// [`extend`](Self::extend). One `extend` may be followed by any
    /// number of events.
    pub fn next_event(&mut self) -> Option<ScanEvent> {
        let buffered = self.window.len();
        if buffered == 0 {
            return None;
        }

        // Hunt for the marker pair. Everything in front of it is noise;
        // the final byte is kept since it may be half of a marker.
        let mut pos = 0;
        while pos + 1 < buffered {
            if self.window[pos] == 0xAA && self.window[pos + 1] == 0x55 {
                break;
            }
            pos += 1;
        }
        if pos > 0 {
            self.discard(pos);
            return Some(ScanEvent::Skipped {
                bytes: pos,
                cause: FrameError::BadStartMarker,
            });
        }

        if buffered < MIN_FRAME_LEN {
            return None;
        }

        // Reject foreign versions before trusting their length field.
        if self.window[2] != PROTOCOL_VERSION {
            self.discard(1);
            return Some(ScanEvent::Skipped {
                bytes: 1,
                cause: FrameError::UnsupportedVersion,
            });
        }

        let total = declared_total_len(&self.window)?;
        if total > MAX_FRAME_LEN {
            // A bogus length field must not stall the stream forever.
            self.discard(1);
            return Some(ScanEvent::Skipped {
                bytes: 1,
                cause: FrameError::PayloadTooLarge,
            });
        }
        if buffered < total {
            return None;
        }

        match Frame::decode(&self.window[..total]) {
            Ok(frame) => {
                self.discard(total);
                Some(ScanEvent::Frame(frame))
            }
            Err(FrameError::UnsupportedKind) => {
                // Checksum already passed, so the boundary is sound and
                // the whole frame can go at once.
                self.discard(total);
                Some(ScanEvent::Skipped {
                    bytes: total,
                    cause: FrameError::UnsupportedKind,
                })
            }
            Err(cause) => {
                // Drop a single byte and rescan; a later frame in the
                // same burst must survive this one's corruption.
                self.discard(1);
                Some(ScanEvent::Skipped { bytes: 1, cause })
            }
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Remove `count` bytes from the front of the window.
    fn discard(&mut self, count: usize) {
        let remaining = self.window.len() - count;
        self.window.copy_within(count.., 0);
        self.window.truncate(remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageKind;

    fn heartbeat(seq: u16) -> Vec<u8, MAX_FRAME_LEN> {
        Frame::new(MessageKind::Heartbeat, seq, 1_000, &[])
            .unwrap()
            .encode_to_vec()
            .unwrap()
    }

    fn drain(reassembler: &mut StreamReassembler) -> (std::vec::Vec<Frame>, usize) {
        let mut frames = std::vec::Vec::new();
        let mut skipped = 0;
        while let Some(event) = reassembler.next_event() {
            match event {
                ScanEvent::Frame(frame) => frames.push(frame),
                ScanEvent::Skipped { bytes, .. } => skipped += bytes,
            }
        }
        (frames, skipped)
    }

    #[test]
    fn test_single_frame_passes_through() {
        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&heartbeat(1));
        let (frames, skipped) = drain(&mut reassembler);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 1);
        assert_eq!(skipped, 0);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_junk_frame_junk_frame() {
        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&[0x00, 0xFF, 0xAA, 0x13]);
        stream.extend_from_slice(&heartbeat(1));
        stream.extend_from_slice(&[0x55, 0x55, 0x01]);
        stream.extend_from_slice(&heartbeat(2));

        // The same byte run must reassemble identically however the
        // transport chops it up.
        for chunk_size in [1, 2, 3, 7, stream.len()] {
            let mut reassembler = StreamReassembler::new();
            let mut frames = std::vec::Vec::new();
            for chunk in stream.chunks(chunk_size) {
                reassembler.extend(chunk);
                let (mut got, _) = drain(&mut reassembler);
                frames.append(&mut got);
            }
            let sequences: std::vec::Vec<u16> = frames.iter().map(|f| f.sequence).collect();
            assert_eq!(sequences, [1, 2], "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more_input() {
        let encoded = heartbeat(5);
        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&encoded[..6]);
        assert_eq!(reassembler.next_event(), None);
        reassembler.extend(&encoded[6..]);
        let (frames, _) = drain(&mut reassembler);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_corrupt_frame_does_not_eat_the_next_one() {
        let mut bad = heartbeat(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&bad);
        reassembler.extend(&heartbeat(2));

        let mut frames = std::vec::Vec::new();
        let mut saw_crc_error = false;
        while let Some(event) = reassembler.next_event() {
            match event {
                ScanEvent::Frame(frame) => frames.push(frame),
                ScanEvent::Skipped { cause, .. } => {
                    saw_crc_error |= cause == FrameError::BadChecksum;
                }
            }
        }
        assert!(saw_crc_error);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 2);
    }

    #[test]
    fn test_bogus_length_field_does_not_stall() {
        let mut bogus = heartbeat(1);
        bogus[10] = 0xFF;
        bogus[11] = 0xFF;

        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&bogus);
        reassembler.extend(&heartbeat(9));

        let (frames, skipped) = drain(&mut reassembler);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 9);
        assert!(skipped > 0);
    }

    #[test]
    fn test_unknown_kind_consumed_as_whole_frame() {
        let mut foreign = heartbeat(1);
        foreign[3] = 0x7E;
        let crc = crate::crc::compute(&foreign[2..12]);
        foreign[12..14].copy_from_slice(&crc.to_be_bytes());

        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&foreign);
        assert_eq!(
            reassembler.next_event(),
            Some(ScanEvent::Skipped {
                bytes: MIN_FRAME_LEN,
                cause: FrameError::UnsupportedKind,
            })
        );
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest_bytes_only() {
        let mut reassembler = StreamReassembler::new();
        let junk = [0x42u8; RX_WINDOW_CAPACITY];
        reassembler.extend(&junk);
        reassembler.extend(&heartbeat(3));

        let (frames, _) = drain(&mut reassembler);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 3);
    }

    #[test]
    fn test_oversized_input_keeps_only_tail() {
        let mut stream = std::vec::Vec::new();
        stream.resize(RX_WINDOW_CAPACITY * 2, 0x11u8);
        stream.extend_from_slice(&heartbeat(7));

        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&stream);
        let (frames, _) = drain(&mut reassembler);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 7);
    }

    #[test]
    fn test_all_noise_never_yields_frames() {
        let mut reassembler = StreamReassembler::new();
        for _ in 0..8 {
            reassembler.extend(&[0x00, 0x11, 0x22, 0xAA, 0x33, 0x55]);
            let (frames, _) = drain(&mut reassembler);
            assert!(frames.is_empty());
        }
    }
}
