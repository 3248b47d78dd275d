//! Typed message views over raw frames.
//!
//! The codec in [`crate::frame`] validates structure and checksums; this
//! module gives both endpoints a typed vocabulary on top of it:
//! - Host -> device: `Command`, `Heartbeat`
//! - Device -> host: `HeartbeatAck`, `Status`

use heapless::Vec;

use crate::frame::{
    Frame, FrameError, MessageKind, COMMAND_CHANNELS, COMMAND_PAYLOAD_LEN, MAX_PAYLOAD_LEN,
    VALUE_MAX,
};

/// A decoded link message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkMessage {
    /// Full actuator command vector, one magnitude per channel.
    Command([u16; COMMAND_CHANNELS]),
    /// Liveness probe.
    Heartbeat,
    /// Liveness reply; pairs with a heartbeat through the frame's
    /// sequence number.
    HeartbeatAck,
    /// Opaque device report.
    Status(Vec<u8, MAX_PAYLOAD_LEN>),
}

impl LinkMessage {
    /// Encode this message into a frame.
    ///
    /// Command magnitudes above [`VALUE_MAX`] are clamped rather than
    /// rejected. `sequence` and `ticks` are supplied by the caller's
    /// session, which owns the counter and the clock.
    pub fn to_frame(&self, sequence: u16, ticks: u32) -> Result<Frame, FrameError> {
        match self {
            LinkMessage::Command(values) => {
                let mut payload = [0u8; COMMAND_PAYLOAD_LEN];
                for (chunk, &value) in payload.chunks_exact_mut(2).zip(values.iter()) {
                    chunk.copy_from_slice(&value.min(VALUE_MAX).to_be_bytes());
                }
                Frame::new(MessageKind::Command, sequence, ticks, &payload)
            }
            LinkMessage::Heartbeat => Frame::new(MessageKind::Heartbeat, sequence, ticks, &[]),
            LinkMessage::HeartbeatAck => {
                Frame::new(MessageKind::HeartbeatAck, sequence, ticks, &[])
            }
            LinkMessage::Status(payload) => {
                Frame::new(MessageKind::Status, sequence, ticks, payload)
            }
        }
    }

    /// Parse a message from a validated frame.
    ///
    /// A Command frame whose payload is not exactly
    /// [`COMMAND_PAYLOAD_LEN`] bytes is structurally broken even though
    /// its checksum passed, and is reported as a length error.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        match frame.kind {
            MessageKind::Command => {
                if frame.payload.len() != COMMAND_PAYLOAD_LEN {
                    return Err(FrameError::LengthMismatch);
                }
                let mut values = [0u16; COMMAND_CHANNELS];
                for (value, chunk) in values.iter_mut().zip(frame.payload.chunks_exact(2)) {
                    *value = u16::from_be_bytes([chunk[0], chunk[1]]);
                }
                Ok(LinkMessage::Command(values))
            }
            MessageKind::Heartbeat => Ok(LinkMessage::Heartbeat),
            MessageKind::HeartbeatAck => Ok(LinkMessage::HeartbeatAck),
            MessageKind::Status => Ok(LinkMessage::Status(frame.payload.clone())),
        }
    }
}
