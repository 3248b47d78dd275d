//! Collaborator traits at the transport and hardware seams.
//!
//! The engine never owns a socket, a UART, or a PWM timer. Endpoint
//! runtimes implement these traits and hand them in; everything inside
//! the crate stays deterministic and host-testable.

/// Errors a transport can report when asked to send one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The transport cannot accept data right now (full socket buffer,
    /// busy DMA channel). Safe to retry on a later tick.
    WouldBlock,
    /// Fewer bytes than one frame were written. The peer's reassembler
    /// will resynchronize past the fragment.
    ShortWrite,
    /// The underlying device or socket failed.
    Io,
}

/// Send half of a frame transport.
///
/// One call carries exactly one complete wire frame: a UDP sender maps
/// it to a single datagram, a serial sender to one contiguous write.
pub trait FrameSink {
    /// Transmit one frame's bytes to the peer.
    fn send_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Actuator output collaborator on the device side.
///
/// Receives normalized thrust per channel; the implementation owns the
/// mapping onto PWM timer registers.
pub trait ActuatorOutputs {
    /// Drive one channel. `duty` is in [-1.0, +1.0] with 0.0 neutral;
    /// values are pre-clamped by the caller.
    fn set_duty(&mut self, channel: u8, duty: f32);

    /// Force every channel to neutral, the loss-of-link reaction.
    fn all_neutral(&mut self) {
        for channel in 0..thrustlink_protocol::COMMAND_CHANNELS as u8 {
            self.set_duty(channel, 0.0);
        }
    }
}

/// Paces the blocking shaper helpers (`hold`, `ramp`, `emergency_stop`).
///
/// The engine computes how many control ticks an operation takes up
/// front; the pacer owns the actual waiting and may cancel between any
/// two ticks.
pub trait TickPacer {
    /// Block until the next control tick.
    ///
    /// Returns the post-wait millisecond timestamp, or `None` to cancel
    /// the remaining ticks of the current operation. Implementations
    /// typically also poll the receive path here.
    fn next_tick(&mut self) -> Option<u32>;
}
