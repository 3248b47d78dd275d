//! Frame encoding and decoding for the V1 thruster-link protocol.
//!
//! Frame layout (big-endian multi-byte fields):
//! - SOF (2 bytes): 0xAA 0x55 synchronization marker
//! - VER (1 byte): protocol version, currently 0x01
//! - KIND (1 byte): message kind identifier
//! - SEQ (2 bytes): sender-local frame sequence counter
//! - TICKS (4 bytes): sender-local millisecond clock
//! - LEN (2 bytes): payload length (0-64)
//! - PAYLOAD (LEN bytes): kind-specific data
//! - CRC (2 bytes): CRC-16/CCITT-FALSE over VER..PAYLOAD

use heapless::Vec;

use crate::crc;

/// Two-byte frame synchronization marker.
pub const FRAME_SOF: [u8; 2] = [0xAA, 0x55];

/// Protocol version carried in every frame.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header length: SOF + VER + KIND + SEQ + TICKS + LEN.
pub const HEADER_LEN: usize = 12;

/// Trailing checksum length.
pub const CRC_LEN: usize = 2;

/// Smallest complete frame (empty payload).
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CRC_LEN;

/// Number of actuator channels carried by a Command frame.
pub const COMMAND_CHANNELS: usize = 8;

/// Command payload size: one big-endian u16 per channel.
pub const COMMAND_PAYLOAD_LEN: usize = COMMAND_CHANNELS * 2;

/// Maximum payload size carried by any frame.
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Maximum complete frame size.
pub const MAX_FRAME_LEN: usize = MIN_FRAME_LEN + MAX_PAYLOAD_LEN;

/// Smallest command magnitude (full reverse).
pub const VALUE_MIN: u16 = 0;

/// Neutral command magnitude (zero thrust).
pub const VALUE_MID: u16 = 5_000;

/// Largest command magnitude (full forward).
pub const VALUE_MAX: u16 = 10_000;

/// Message kinds understood by this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    /// Host -> device: full actuator command vector.
    Command = 0x01,
    /// Host -> device: liveness probe, empty payload.
    Heartbeat = 0x10,
    /// Device -> host: echoes the heartbeat's sequence number.
    HeartbeatAck = 0x11,
    /// Device -> host: reserved, opaque payload owned by the application.
    Status = 0x20,
}

impl MessageKind {
    /// Parse a kind byte. Unknown values return `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MessageKind::Command),
            0x10 => Some(MessageKind::Heartbeat),
            0x11 => Some(MessageKind::HeartbeatAck),
            0x20 => Some(MessageKind::Status),
            _ => None,
        }
    }

    /// Wire representation of this kind.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Exact payload length this kind requires, or `None` when variable.
    fn expected_payload_len(self) -> Option<usize> {
        match self {
            MessageKind::Command => Some(COMMAND_PAYLOAD_LEN),
            MessageKind::Heartbeat | MessageKind::HeartbeatAck => Some(0),
            MessageKind::Status => None,
        }
    }
}

/// Errors that can occur during frame parsing or encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Declared or supplied payload exceeds [`MAX_PAYLOAD_LEN`].
    PayloadTooLarge,
    /// Payload length does not match what the message kind requires.
    LengthMismatch,
    /// Buffer ends before the declared frame does.
    Truncated,
    /// Buffer does not begin with the 0xAA 0x55 marker.
    BadStartMarker,
    /// Version byte differs from [`PROTOCOL_VERSION`].
    UnsupportedVersion,
    /// Kind byte not recognized. The checksum was already verified, so
    /// the frame boundary is still trustworthy.
    UnsupportedKind,
    /// Checksum mismatch.
    BadChecksum,
    /// Output buffer too small for encoding.
    BufferTooSmall,
}

/// A parsed or constructed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind.
    pub kind: MessageKind,
    /// Sender-local sequence number.
    pub sequence: u16,
    /// Sender-local millisecond clock at build time.
    pub ticks: u32,
    /// Payload data.
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Frame {
    /// Create a frame, validating the payload length for the kind.
    pub fn new(
        kind: MessageKind,
        sequence: u16,
        ticks: u32,
        payload: &[u8],
    ) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge);
        }
        if let Some(expected) = kind.expected_payload_len() {
            if payload.len() != expected {
                return Err(FrameError::LengthMismatch);
            }
        }

        let mut payload_vec = Vec::new();
        payload_vec
            .extend_from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLarge)?;

        Ok(Self {
            kind,
            sequence,
            ticks,
            payload: payload_vec,
        })
    }

    /// Total on-wire length of this frame.
    pub fn wire_len(&self) -> usize {
        MIN_FRAME_LEN + self.payload.len()
    }

    /// Encode this frame into a byte buffer.
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let frame_len = self.wire_len();
        if buffer.len() < frame_len {
            return Err(FrameError::BufferTooSmall);
        }

        buffer[0] = FRAME_SOF[0];
        buffer[1] = FRAME_SOF[1];
        buffer[2] = PROTOCOL_VERSION;
        buffer[3] = self.kind.to_byte();
        buffer[4..6].copy_from_slice(&self.sequence.to_be_bytes());
        buffer[6..10].copy_from_slice(&self.ticks.to_be_bytes());
        buffer[10..12].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buffer[HEADER_LEN..HEADER_LEN + self.payload.len()].copy_from_slice(&self.payload);

        let checksum = crc::compute(&buffer[2..HEADER_LEN + self.payload.len()]);
        buffer[HEADER_LEN + self.payload.len()..frame_len]
            .copy_from_slice(&checksum.to_be_bytes());

        Ok(frame_len)
    }

    /// Encode this frame into a heapless Vec.
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_FRAME_LEN>, FrameError> {
        let mut buffer = [0u8; MAX_FRAME_LEN];
        let len = self.encode(&mut buffer)?;
        let mut vec = Vec::new();
        vec.extend_from_slice(&buffer[..len])
            .map_err(|_| FrameError::BufferTooSmall)?;
        Ok(vec)
    }

    /// Decode one frame from the start of `buffer`.
    ///
    /// Trailing bytes after the frame are ignored, which lets a UDP
    /// receiver hand over a whole datagram. No field is acted on before
    /// the structural checks and the checksum all pass; malformed,
    /// truncated, or adversarial input yields a typed error, never a
    /// panic.
    pub fn decode(buffer: &[u8]) -> Result<Self, FrameError> {
        if buffer.len() < MIN_FRAME_LEN {
            return Err(FrameError::Truncated);
        }
        if buffer[0..2] != FRAME_SOF {
            return Err(FrameError::BadStartMarker);
        }
        if buffer[2] != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion);
        }

        let payload_len = u16::from_be_bytes([buffer[10], buffer[11]]) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge);
        }
        let frame_len = MIN_FRAME_LEN + payload_len;
        if buffer.len() < frame_len {
            return Err(FrameError::Truncated);
        }

        let computed = crc::compute(&buffer[2..HEADER_LEN + payload_len]);
        let received = u16::from_be_bytes([
            buffer[HEADER_LEN + payload_len],
            buffer[HEADER_LEN + payload_len + 1],
        ]);
        if computed != received {
            return Err(FrameError::BadChecksum);
        }

        let kind = MessageKind::from_byte(buffer[3]).ok_or(FrameError::UnsupportedKind)?;
        let sequence = u16::from_be_bytes([buffer[4], buffer[5]]);
        let ticks = u32::from_be_bytes([buffer[6], buffer[7], buffer[8], buffer[9]]);

        let mut payload = Vec::new();
        payload
            .extend_from_slice(&buffer[HEADER_LEN..HEADER_LEN + payload_len])
            .map_err(|_| FrameError::PayloadTooLarge)?;

        Ok(Self {
            kind,
            sequence,
            ticks,
            payload,
        })
    }
}

/// Total frame length implied by a buffer's header, before validation.
///
/// Requires the LEN field to be present; returns `None` on fewer than
/// [`HEADER_LEN`] bytes. The result is a hint for reassembly and is not
/// trusted until the checksum passes.
pub fn declared_total_len(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEADER_LEN {
        return None;
    }
    let payload_len = u16::from_be_bytes([buffer[10], buffer[11]]) as usize;
    Some(MIN_FRAME_LEN + payload_len)
}
