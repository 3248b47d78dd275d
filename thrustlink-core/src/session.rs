//! Protocol session: per-endpoint link state.
//!
//! One `ProtocolSession` pairs one endpoint with one peer. It owns the
//! outgoing sequence counter, the liveness clock the failsafe runs on,
//! heartbeat round-trip pairing, and the link statistics. Both
//! endpoints run the same session type; they differ only in which
//! ingest entry point their transport feeds:
//!
//! - the host receives whole UDP datagrams and calls
//!   [`ingest_datagram`](ProtocolSession::ingest_datagram);
//! - the board receives arbitrary serial chunks and calls
//!   [`ingest_stream`](ProtocolSession::ingest_stream), which runs the
//!   reassembler and reacts to commands and heartbeats in place.
//!
//! Malformed input is counted and absorbed; nothing a peer sends can
//! make ingest fail.

use heapless::Vec;

use thrustlink_protocol::{
    Frame, FrameError, LinkMessage, MessageKind, ScanEvent, StreamReassembler, COMMAND_CHANNELS,
    MAX_FRAME_LEN, MAX_PAYLOAD_LEN, VALUE_MAX,
};

use crate::config::{LinkConfig, FAILSAFE_TIMEOUT_FLOOR_MS};
use crate::traits::{ActuatorOutputs, FrameSink};
use crate::units::value_to_duty;

/// Encoded frame ready for a [`FrameSink`].
pub type FrameBytes = Vec<u8, MAX_FRAME_LEN>;

/// Link statistics, all monotonically increasing until reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Command frames built.
    pub tx_commands: u32,
    /// Heartbeat frames built.
    pub tx_heartbeats: u32,
    /// Failed transmit attempts reported back to the session.
    pub tx_errors: u32,
    /// Liveness-bearing frames accepted.
    pub rx_accepted: u32,
    /// Heartbeat acks received, matched or not.
    pub rx_heartbeat_acks: u32,
    /// Heartbeat acks that matched no outstanding probe.
    pub rx_stale_acks: u32,
    /// Status frames received.
    pub rx_status: u32,
    /// Frames dropped for checksum mismatch.
    pub rx_crc_errors: u32,
    /// Frames dropped for structural/length problems.
    pub rx_length_errors: u32,
    /// Frames dropped for unknown version or kind, plus kinds that do
    /// not travel in this direction.
    pub rx_unsupported: u32,
    /// Bytes discarded while resynchronizing the stream.
    pub rx_resync_bytes: u32,
}

/// Outcome of ingesting one datagram on the host side.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IngestEvent {
    /// A liveness-bearing frame was accepted.
    Accepted,
    /// A heartbeat ack matched the outstanding probe.
    RttMeasured {
        /// Round trip in sender-clock milliseconds.
        rtt_ms: u32,
    },
    /// A heartbeat ack arrived with no matching probe outstanding.
    StaleAck {
        /// Sequence number the ack carried.
        sequence: u16,
    },
    /// An opaque device report; ownership passes to the application.
    Status {
        /// Raw status payload.
        payload: Vec<u8, MAX_PAYLOAD_LEN>,
    },
    /// The datagram failed validation and was counted.
    Rejected {
        /// Decode failure that dropped it.
        cause: FrameError,
    },
}

/// An outbound heartbeat waiting for its ack.
#[derive(Debug, Clone, Copy)]
struct HeartbeatProbe {
    sequence: u16,
    sent_at_ms: u32,
}

/// Per-endpoint protocol state. See the module docs for the role split.
#[derive(Debug)]
pub struct ProtocolSession {
    next_seq: u16,
    last_valid_rx_ms: u32,
    failsafe_timeout_ms: u32,
    pending_heartbeat: Option<HeartbeatProbe>,
    last_rtt_ms: Option<u32>,
    stats: LinkStats,
    reassembler: StreamReassembler,
}

impl ProtocolSession {
    /// Create a session.
    ///
    /// The liveness clock starts at `now_ms` so a freshly booted
    /// endpoint does not trip the failsafe before the first frame had
    /// any chance to arrive.
    pub fn new(config: &LinkConfig, now_ms: u32) -> Self {
        let config = config.normalized();
        Self {
            next_seq: 0,
            last_valid_rx_ms: now_ms,
            failsafe_timeout_ms: config.failsafe_timeout_ms,
            pending_heartbeat: None,
            last_rtt_ms: None,
            stats: LinkStats::default(),
            reassembler: StreamReassembler::new(),
        }
    }

    /// Build a command frame carrying all channels.
    ///
    /// Magnitudes above [`VALUE_MAX`] are clamped. Advances the
    /// sequence counter.
    pub fn build_command(
        &mut self,
        values: &[u16; COMMAND_CHANNELS],
        now_ms: u32,
    ) -> Result<FrameBytes, FrameError> {
        let mut clamped = *values;
        for value in &mut clamped {
            *value = (*value).min(VALUE_MAX);
        }
        let sequence = self.advance_seq();
        let bytes = LinkMessage::Command(clamped)
            .to_frame(sequence, now_ms)?
            .encode_to_vec()?;
        self.stats.tx_commands += 1;
        Ok(bytes)
    }

    /// Build a heartbeat probe and arm round-trip matching for it.
    ///
    /// Only the newest probe is tracked; an ack for an older one will
    /// count as stale.
    pub fn build_heartbeat(&mut self, now_ms: u32) -> Result<FrameBytes, FrameError> {
        let sequence = self.advance_seq();
        let bytes = LinkMessage::Heartbeat
            .to_frame(sequence, now_ms)?
            .encode_to_vec()?;
        self.pending_heartbeat = Some(HeartbeatProbe {
            sequence,
            sent_at_ms: now_ms,
        });
        self.stats.tx_heartbeats += 1;
        Ok(bytes)
    }

    /// Build a status report frame (device -> host, reserved payload).
    pub fn build_status(&mut self, payload: &[u8], now_ms: u32) -> Result<FrameBytes, FrameError> {
        let sequence = self.advance_seq();
        Frame::new(MessageKind::Status, sequence, now_ms, payload)?.encode_to_vec()
    }

    /// Ingest one datagram (host side).
    pub fn ingest_datagram(&mut self, datagram: &[u8], now_ms: u32) -> IngestEvent {
        match Frame::decode(datagram) {
            Ok(frame) => self.accept_host_frame(&frame, now_ms),
            Err(cause) => {
                self.count_decode_error(cause);
                IngestEvent::Rejected { cause }
            }
        }
    }

    /// Ingest a raw byte chunk (device side).
    ///
    /// Runs the reassembler over whatever the transport delivered.
    /// Validated commands are forwarded to `outputs` as clamped duties;
    /// heartbeats are answered through `sink` with the echoed sequence
    /// and this device's own clock. Returns the number of frames
    /// accepted.
    pub fn ingest_stream<S: FrameSink, A: ActuatorOutputs>(
        &mut self,
        chunk: &[u8],
        now_ms: u32,
        sink: &mut S,
        outputs: &mut A,
    ) -> usize {
        self.reassembler.extend(chunk);

        let mut accepted = 0;
        while let Some(event) = self.reassembler.next_event() {
            match event {
                ScanEvent::Frame(frame) => {
                    if self.accept_device_frame(&frame, now_ms, sink, outputs) {
                        accepted += 1;
                    }
                }
                ScanEvent::Skipped { bytes, cause } => {
                    self.stats.rx_resync_bytes += bytes as u32;
                    // Plain noise in front of a marker is the stream's
                    // normal state, not a frame error.
                    if cause != FrameError::BadStartMarker {
                        self.count_decode_error(cause);
                    }
                }
            }
        }
        accepted
    }

    /// Whether a liveness-bearing frame arrived within the timeout.
    pub fn is_alive(&self, now_ms: u32) -> bool {
        now_ms.wrapping_sub(self.last_valid_rx_ms) <= self.failsafe_timeout_ms
    }

    /// Poll the loss-of-link protection.
    ///
    /// Returns true exactly when the link just went dead; the caller
    /// must force every actuator channel to neutral. The timer re-arms
    /// on a trip so one silence gap fires once, not every tick.
    pub fn poll_failsafe(&mut self, now_ms: u32) -> bool {
        if self.is_alive(now_ms) {
            return false;
        }
        self.last_valid_rx_ms = now_ms;
        true
    }

    /// Adjust the failsafe timeout at runtime. Values below the 50 ms
    /// floor are raised to it.
    pub fn set_failsafe_timeout(&mut self, timeout_ms: u32) {
        self.failsafe_timeout_ms = timeout_ms.max(FAILSAFE_TIMEOUT_FLOOR_MS);
    }

    /// Most recent matched heartbeat round trip, if any.
    pub fn last_rtt_ms(&self) -> Option<u32> {
        self.last_rtt_ms
    }

    /// Link statistics since creation or the last reset.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Zero all statistics counters.
    pub fn reset_stats(&mut self) {
        self.stats = LinkStats::default();
    }

    /// Record a failed transmit of a frame this session built.
    pub fn record_tx_error(&mut self) {
        self.stats.tx_errors += 1;
    }

    fn advance_seq(&mut self) -> u16 {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.next_seq
    }

    fn note_liveness(&mut self, now_ms: u32) {
        self.last_valid_rx_ms = now_ms;
        self.stats.rx_accepted += 1;
    }

    fn count_decode_error(&mut self, cause: FrameError) {
        match cause {
            FrameError::BadChecksum => self.stats.rx_crc_errors += 1,
            FrameError::UnsupportedVersion | FrameError::UnsupportedKind => {
                self.stats.rx_unsupported += 1
            }
            _ => self.stats.rx_length_errors += 1,
        }
    }

    fn accept_host_frame(&mut self, frame: &Frame, now_ms: u32) -> IngestEvent {
        match LinkMessage::from_frame(frame) {
            Ok(LinkMessage::Command(_)) | Ok(LinkMessage::Heartbeat) => {
                self.note_liveness(now_ms);
                IngestEvent::Accepted
            }
            Ok(LinkMessage::HeartbeatAck) => {
                self.stats.rx_heartbeat_acks += 1;
                match self.pending_heartbeat {
                    Some(probe) if probe.sequence == frame.sequence => {
                        let rtt_ms = now_ms.wrapping_sub(probe.sent_at_ms);
                        self.last_rtt_ms = Some(rtt_ms);
                        self.pending_heartbeat = None;
                        IngestEvent::RttMeasured { rtt_ms }
                    }
                    _ => {
                        self.stats.rx_stale_acks += 1;
                        IngestEvent::StaleAck {
                            sequence: frame.sequence,
                        }
                    }
                }
            }
            Ok(LinkMessage::Status(payload)) => {
                self.stats.rx_status += 1;
                IngestEvent::Status { payload }
            }
            Err(cause) => {
                self.count_decode_error(cause);
                IngestEvent::Rejected { cause }
            }
        }
    }

    fn accept_device_frame<S: FrameSink, A: ActuatorOutputs>(
        &mut self,
        frame: &Frame,
        now_ms: u32,
        sink: &mut S,
        outputs: &mut A,
    ) -> bool {
        match LinkMessage::from_frame(frame) {
            Ok(LinkMessage::Command(values)) => {
                self.note_liveness(now_ms);
                for (channel, &value) in values.iter().enumerate() {
                    outputs.set_duty(channel as u8, value_to_duty(value));
                }
                true
            }
            Ok(LinkMessage::Heartbeat) => {
                self.note_liveness(now_ms);
                // The ack echoes the heartbeat's sequence but carries
                // this device's clock; ticks are never relayed.
                self.send_heartbeat_ack(frame.sequence, now_ms, sink);
                true
            }
            Ok(LinkMessage::HeartbeatAck) | Ok(LinkMessage::Status(_)) => {
                // These kinds travel device -> host only.
                self.stats.rx_unsupported += 1;
                false
            }
            Err(cause) => {
                self.count_decode_error(cause);
                false
            }
        }
    }

    fn send_heartbeat_ack<S: FrameSink>(&mut self, sequence: u16, now_ms: u32, sink: &mut S) {
        let Ok(frame) = LinkMessage::HeartbeatAck.to_frame(sequence, now_ms) else {
            return;
        };
        let Ok(bytes) = frame.encode_to_vec() else {
            return;
        };
        if sink.send_frame(&bytes).is_err() {
            self.stats.tx_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thrustlink_protocol::MessageKind;

    struct CaptureSink {
        frames: std::vec::Vec<std::vec::Vec<u8>>,
        fail: bool,
    }

    impl CaptureSink {
        fn new() -> Self {
            Self {
                frames: std::vec::Vec::new(),
                fail: false,
            }
        }
    }

    impl FrameSink for CaptureSink {
        fn send_frame(&mut self, bytes: &[u8]) -> Result<(), crate::traits::TransportError> {
            if self.fail {
                return Err(crate::traits::TransportError::Io);
            }
            self.frames.push(bytes.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CaptureOutputs {
        duties: [f32; COMMAND_CHANNELS],
        calls: usize,
    }

    impl ActuatorOutputs for CaptureOutputs {
        fn set_duty(&mut self, channel: u8, duty: f32) {
            self.duties[channel as usize] = duty;
            self.calls += 1;
        }
    }

    fn host_session() -> ProtocolSession {
        ProtocolSession::new(&LinkConfig::default(), 0)
    }

    #[test]
    fn test_build_command_advances_sequence_and_clamps() {
        let mut session = host_session();
        let first = session
            .build_command(&[60_000, 0, 0, 0, 0, 0, 0, 0], 10)
            .unwrap();
        let second = session.build_command(&[0; COMMAND_CHANNELS], 20).unwrap();

        let first = Frame::decode(&first).unwrap();
        let second = Frame::decode(&second).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        match LinkMessage::from_frame(&first).unwrap() {
            LinkMessage::Command(values) => assert_eq!(values[0], VALUE_MAX),
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(session.stats().tx_commands, 2);
    }

    #[test]
    fn test_heartbeat_rtt_matching() {
        let mut host = host_session();
        let probe = host.build_heartbeat(100).unwrap();
        let probe = Frame::decode(&probe).unwrap();

        let ack = LinkMessage::HeartbeatAck
            .to_frame(probe.sequence, 999_999)
            .unwrap()
            .encode_to_vec()
            .unwrap();
        let event = host.ingest_datagram(&ack, 137);

        assert_eq!(event, IngestEvent::RttMeasured { rtt_ms: 37 });
        assert_eq!(host.last_rtt_ms(), Some(37));
        assert_eq!(host.stats().rx_heartbeat_acks, 1);
    }

    #[test]
    fn test_stale_ack_leaves_rtt_unchanged() {
        let mut host = host_session();
        let probe = host.build_heartbeat(100).unwrap();
        let probe = Frame::decode(&probe).unwrap();

        let stale = LinkMessage::HeartbeatAck
            .to_frame(probe.sequence.wrapping_sub(1), 0)
            .unwrap()
            .encode_to_vec()
            .unwrap();
        let event = host.ingest_datagram(&stale, 137);

        assert_eq!(
            event,
            IngestEvent::StaleAck {
                sequence: probe.sequence.wrapping_sub(1)
            }
        );
        assert_eq!(host.last_rtt_ms(), None);
        assert_eq!(host.stats().rx_stale_acks, 1);

        // The real ack still matches afterwards.
        let ack = LinkMessage::HeartbeatAck
            .to_frame(probe.sequence, 0)
            .unwrap()
            .encode_to_vec()
            .unwrap();
        assert_eq!(host.ingest_datagram(&ack, 150), IngestEvent::RttMeasured { rtt_ms: 50 });
    }

    #[test]
    fn test_newest_probe_wins() {
        let mut host = host_session();
        let first = Frame::decode(&host.build_heartbeat(100).unwrap()).unwrap();
        let _second = host.build_heartbeat(200).unwrap();

        let late_ack = LinkMessage::HeartbeatAck
            .to_frame(first.sequence, 0)
            .unwrap()
            .encode_to_vec()
            .unwrap();
        assert_eq!(
            host.ingest_datagram(&late_ack, 210),
            IngestEvent::StaleAck {
                sequence: first.sequence
            }
        );
    }

    #[test]
    fn test_liveness_boundary() {
        let mut session = ProtocolSession::new(&LinkConfig::default(), 0);
        let command = session.build_command(&[5_000; COMMAND_CHANNELS], 0).unwrap();

        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let mut sink = CaptureSink::new();
        let mut outputs = CaptureOutputs::default();
        device.ingest_stream(&command, 1_000, &mut sink, &mut outputs);

        let timeout = LinkConfig::default().failsafe_timeout_ms;
        assert!(device.is_alive(1_000 + timeout - 1));
        assert!(device.is_alive(1_000 + timeout));
        assert!(!device.is_alive(1_000 + timeout + 1));
    }

    #[test]
    fn test_failsafe_trips_once_then_rearms() {
        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let timeout = LinkConfig::default().failsafe_timeout_ms;

        assert!(!device.poll_failsafe(timeout));
        assert!(device.poll_failsafe(timeout + 1));
        // Re-armed: the same silence gap does not fire again.
        assert!(!device.poll_failsafe(timeout + 2));
        assert!(device.poll_failsafe(2 * timeout + 10));
    }

    #[test]
    fn test_failsafe_timeout_floor() {
        let mut session = host_session();
        session.set_failsafe_timeout(1);
        assert!(session.is_alive(FAILSAFE_TIMEOUT_FLOOR_MS));
        assert!(!session.is_alive(FAILSAFE_TIMEOUT_FLOOR_MS + 1));
    }

    #[test]
    fn test_device_applies_command_as_duties() {
        let mut host = host_session();
        let command = host
            .build_command(&[0, 2_500, 5_000, 7_500, 10_000, 5_000, 5_000, 5_000], 0)
            .unwrap();

        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let mut sink = CaptureSink::new();
        let mut outputs = CaptureOutputs::default();
        let accepted = device.ingest_stream(&command, 50, &mut sink, &mut outputs);

        assert_eq!(accepted, 1);
        assert_eq!(outputs.calls, COMMAND_CHANNELS);
        assert_eq!(outputs.duties[0], -1.0);
        assert_eq!(outputs.duties[1], -0.5);
        assert_eq!(outputs.duties[2], 0.0);
        assert_eq!(outputs.duties[3], 0.5);
        assert_eq!(outputs.duties[4], 1.0);
        assert_eq!(device.stats().rx_accepted, 1);
    }

    #[test]
    fn test_device_acks_heartbeat_with_echoed_sequence_and_own_clock() {
        let mut host = host_session();
        let heartbeat = host.build_heartbeat(123).unwrap();

        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let mut sink = CaptureSink::new();
        let mut outputs = CaptureOutputs::default();
        device.ingest_stream(&heartbeat, 4_567, &mut sink, &mut outputs);

        assert_eq!(sink.frames.len(), 1);
        let ack = Frame::decode(&sink.frames[0]).unwrap();
        assert_eq!(ack.kind, MessageKind::HeartbeatAck);
        assert_eq!(ack.sequence, Frame::decode(&heartbeat).unwrap().sequence);
        assert_eq!(ack.ticks, 4_567);
    }

    #[test]
    fn test_device_counts_wrong_direction_kinds() {
        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let ack = LinkMessage::HeartbeatAck
            .to_frame(1, 0)
            .unwrap()
            .encode_to_vec()
            .unwrap();

        let mut sink = CaptureSink::new();
        let mut outputs = CaptureOutputs::default();
        let accepted = device.ingest_stream(&ack, 0, &mut sink, &mut outputs);

        assert_eq!(accepted, 0);
        assert_eq!(device.stats().rx_unsupported, 1);
        // Not liveness-bearing: the failsafe clock must not move.
        assert!(!device.is_alive(LinkConfig::default().failsafe_timeout_ms + 1));
    }

    #[test]
    fn test_stream_survives_noise_between_frames() {
        let mut host = host_session();
        let first = host.build_command(&[6_000; COMMAND_CHANNELS], 0).unwrap();
        let second = host.build_command(&[7_000; COMMAND_CHANNELS], 0).unwrap();

        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&[0xDE, 0xAD]);
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&[0xAA, 0x00, 0x55]);
        stream.extend_from_slice(&second);

        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let mut sink = CaptureSink::new();
        let mut outputs = CaptureOutputs::default();
        let accepted = device.ingest_stream(&stream, 10, &mut sink, &mut outputs);

        assert_eq!(accepted, 2);
        assert_eq!(device.stats().rx_accepted, 2);
        assert!(device.stats().rx_resync_bytes >= 5);
        // Noise alone is not a frame error.
        assert_eq!(device.stats().rx_crc_errors, 0);
    }

    #[test]
    fn test_corrupt_datagram_counted_not_escalated() {
        let mut host = host_session();
        let mut ack = LinkMessage::HeartbeatAck
            .to_frame(1, 0)
            .unwrap()
            .encode_to_vec()
            .unwrap();
        let last = ack.len() - 1;
        ack[last] ^= 0x01;

        let event = host.ingest_datagram(&ack, 0);
        assert_eq!(
            event,
            IngestEvent::Rejected {
                cause: FrameError::BadChecksum
            }
        );
        assert_eq!(host.stats().rx_crc_errors, 1);
    }

    #[test]
    fn test_foreign_version_counted_unsupported() {
        let mut host = host_session();
        let mut frame = LinkMessage::Heartbeat
            .to_frame(1, 0)
            .unwrap()
            .encode_to_vec()
            .unwrap();
        frame[2] = 0x02;

        let event = host.ingest_datagram(&frame, 0);
        assert_eq!(
            event,
            IngestEvent::Rejected {
                cause: FrameError::UnsupportedVersion
            }
        );
        assert_eq!(host.stats().rx_unsupported, 1);
    }

    #[test]
    fn test_status_payload_reaches_application() {
        let mut device = ProtocolSession::new(&LinkConfig::default(), 0);
        let status = device.build_status(&[0x01, 0x42], 0).unwrap();

        let mut host = host_session();
        match host.ingest_datagram(&status, 0) {
            IngestEvent::Status { payload } => assert_eq!(payload.as_slice(), &[0x01, 0x42]),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(host.stats().rx_status, 1);
        // Status is not liveness-bearing.
        assert_eq!(host.stats().rx_accepted, 0);
    }

    #[test]
    fn test_reset_stats() {
        let mut host = host_session();
        host.build_heartbeat(0).unwrap();
        assert_ne!(host.stats().tx_heartbeats, 0);
        host.reset_stats();
        assert_eq!(*host.stats(), LinkStats::default());
    }
}
