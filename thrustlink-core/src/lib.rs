//! Board-agnostic endpoint logic for the thruster link.
//!
//! This crate contains everything above the wire format and below the
//! transports, shared by the surface host and the thruster-control
//! board:
//!
//! - Collaborator traits (transport send half, PWM outputs, pacing)
//! - Protocol session (sequence/liveness/heartbeat bookkeeping, stats)
//! - Command shaper (slew limiting, reverse protection, group scheduling)
//! - Configuration type definitions
//! - Command value domain conversions
//!
//! Timestamps are plain `u32` millisecond ticks supplied by the caller;
//! the crate never reads a clock or sleeps on its own, which keeps it
//! testable on the host and portable to the board.

#![no_std]
#![deny(unsafe_code)]

// Tests run on the host and may use std collections.
#[cfg(test)]
extern crate std;

pub mod config;
pub mod session;
pub mod shaper;
pub mod traits;
pub mod units;

pub use config::{GroupMode, LinkConfig, ShaperConfig};
pub use session::{FrameBytes, IngestEvent, LinkStats, ProtocolSession};
pub use shaper::{CommandShaper, ShaperError, ShaperSnapshot};
pub use traits::{ActuatorOutputs, FrameSink, TickPacer, TransportError};
