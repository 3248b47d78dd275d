//! V1 Thruster-Link Wire Protocol
//!
//! This crate defines the framed binary protocol spoken between the
//! surface host and the thruster-control board. The same engine is used
//! on both ends: the host packs frames into UDP datagrams, the board
//! reassembles them out of an irregular serial/DMA byte stream.
//!
//! # Protocol Overview
//!
//! All messages use a single binary frame format (big-endian fields):
//! ```text
//! ┌───────┬─────┬──────┬─────┬───────┬─────┬─────────┬───────┐
//! │ SOF   │ VER │ KIND │ SEQ │ TICKS │ LEN │ PAYLOAD │ CRC16 │
//! │ AA 55 │ 1B  │ 1B   │ 2B  │ 4B    │ 2B  │ 0–64B   │ 2B    │
//! └───────┴─────┴──────┴─────┴───────┴─────┴─────────┴───────┘
//! ```
//!
//! The CRC (CRC-16/CCITT-FALSE) covers VER through the end of PAYLOAD;
//! the start-of-frame marker and the CRC field itself are excluded. A
//! frame is only trusted once both the structural checks and the CRC
//! pass.
//!
//! `ticks` is the sender's own millisecond clock. Clocks are never
//! compared across endpoints; round-trip times are computed entirely on
//! one side.

#![no_std]
#![deny(unsafe_code)]

// Tests run on the host and may use std collections.
#[cfg(test)]
extern crate std;

pub mod crc;
pub mod frame;
pub mod messages;
pub mod reassembler;

pub use frame::{
    Frame, FrameError, MessageKind, COMMAND_CHANNELS, COMMAND_PAYLOAD_LEN, FRAME_SOF,
    MAX_FRAME_LEN, MAX_PAYLOAD_LEN, MIN_FRAME_LEN, PROTOCOL_VERSION, VALUE_MAX, VALUE_MID,
    VALUE_MIN,
};
pub use messages::LinkMessage;
pub use reassembler::{ScanEvent, StreamReassembler, RX_WINDOW_CAPACITY};
