//! Command shaping: slew limiting, reverse protection, group scheduling.
//!
//! The shaper owns a shadow copy of what each channel was last told to
//! do (`current`) next to what the application wants (`target`), and
//! walks `current` toward `target` one bounded step per control tick.
//! Every tick transmits the complete eight-channel vector in one
//! command frame; grouping only decides which channels are allowed to
//! *move* on a given tick, never which are sent.
//!
//! There are no discrete states here, just a numeric controller that is
//! always converging.

use thrustlink_protocol::{FrameError, COMMAND_CHANNELS, VALUE_MAX, VALUE_MID};

use crate::config::{GroupMode, ShaperConfig, MASK_ALL};
use crate::session::ProtocolSession;
use crate::traits::{FrameSink, TickPacer, TransportError};
use crate::units::percent_to_value;

/// Errors reported by shaper operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ShaperError {
    /// Channel index out of range. Numeric values are clamped, but a
    /// bad index is a caller bug and is rejected outright.
    InvalidChannel,
    /// A blocking helper was asked to run for zero time.
    InvalidDuration,
    /// Frame construction failed.
    Frame(FrameError),
    /// The transport refused the command frame. Channel state was not
    /// committed; the next tick retries from the same shadow values.
    Transport(TransportError),
}

impl From<FrameError> for ShaperError {
    fn from(cause: FrameError) -> Self {
        ShaperError::Frame(cause)
    }
}

impl From<TransportError> for ShaperError {
    fn from(cause: TransportError) -> Self {
        ShaperError::Transport(cause)
    }
}

/// Shadow state of one actuator channel, in wire magnitudes.
#[derive(Debug, Clone, Copy)]
struct ChannelState {
    /// Last value actually transmitted.
    current: u16,
    /// Most recently requested value.
    target: u16,
}

/// Point-in-time view of the shaper for telemetry and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShaperSnapshot {
    /// Last transmitted value per channel.
    pub current: [u16; COMMAND_CHANNELS],
    /// Requested value per channel.
    pub target: [u16; COMMAND_CHANNELS],
    /// Ticks committed since creation.
    pub step_count: u64,
}

/// The command shaping controller.
pub struct CommandShaper {
    config: ShaperConfig,
    channels: [ChannelState; COMMAND_CHANNELS],
    use_group_b: bool,
    step_count: u64,
}

impl CommandShaper {
    /// Create a shaper with every channel at neutral.
    pub fn new(config: ShaperConfig) -> Self {
        Self {
            config: config.normalized(),
            channels: [ChannelState {
                current: VALUE_MID,
                target: VALUE_MID,
            }; COMMAND_CHANNELS],
            use_group_b: false,
            step_count: 0,
        }
    }

    /// Active configuration after normalization.
    pub fn config(&self) -> &ShaperConfig {
        &self.config
    }

    /// Request a new value for one channel.
    ///
    /// The value is clamped to the wire range; nothing is transmitted
    /// until the next [`step`](Self::step).
    pub fn set_target(&mut self, channel: usize, value: u16) -> Result<(), ShaperError> {
        let state = self
            .channels
            .get_mut(channel)
            .ok_or(ShaperError::InvalidChannel)?;
        state.target = value.min(VALUE_MAX);
        Ok(())
    }

    /// Request a new value as a duty percentage.
    ///
    /// Negative input is the operator shorthand for neutral.
    pub fn set_target_percent(&mut self, channel: usize, pct: f32) -> Result<(), ShaperError> {
        let value = if pct < 0.0 {
            VALUE_MID
        } else {
            percent_to_value(pct)
        };
        self.set_target(channel, value)
    }

    /// Request new values for exactly the channels selected by `mask`
    /// (bit n = channel n); the rest keep their targets.
    pub fn set_targets_masked(&mut self, mask: u8, values: &[u16; COMMAND_CHANNELS]) {
        for (channel, &value) in values.iter().enumerate() {
            if mask & (1 << channel) != 0 {
                self.channels[channel].target = value.min(VALUE_MAX);
            }
        }
    }

    /// Point every channel at neutral.
    pub fn set_all_targets_neutral(&mut self) {
        for state in &mut self.channels {
            state.target = VALUE_MID;
        }
    }

    /// Run one control tick: shape every channel, transmit the full
    /// vector, commit on success.
    ///
    /// On a transport failure nothing is committed; the shadow values
    /// and the group toggle are exactly as before the call.
    pub fn step<S: FrameSink>(
        &mut self,
        session: &mut ProtocolSession,
        sink: &mut S,
        now_ms: u32,
    ) -> Result<(), ShaperError> {
        let mask = self.active_mask();
        let max_step = self.config.max_step as i32;
        let mid = VALUE_MID as i32;

        let mut next = [0u16; COMMAND_CHANNELS];
        for (channel, state) in self.channels.iter().enumerate() {
            let current = state.current as i32;
            let target = state.target as i32;

            // With reverse protection on and the target across neutral,
            // this tick only converges toward neutral; the crossing
            // happens on a later tick.
            let effective_target = if self.config.reverse_protection
                && ((current > mid && target < mid) || (current < mid && target > mid))
            {
                mid
            } else {
                target
            };

            if mask & (1 << channel) == 0 {
                // Not this tick's group: hold exactly.
                next[channel] = state.current;
                continue;
            }

            let delta = (effective_target - current).clamp(-max_step, max_step);
            next[channel] = (current + delta).clamp(0, VALUE_MAX as i32) as u16;
        }

        let bytes = session.build_command(&next, now_ms)?;
        if let Err(cause) = sink.send_frame(&bytes) {
            session.record_tx_error();
            return Err(ShaperError::Transport(cause));
        }

        for (state, &value) in self.channels.iter_mut().zip(next.iter()) {
            state.current = value;
        }
        self.step_count += 1;
        if self.config.group_mode == GroupMode::Alternate {
            self.use_group_b = !self.use_group_b;
        }
        Ok(())
    }

    /// Hold one channel at a value for a duration.
    ///
    /// Blocking convenience for setup and test rigs, not for the
    /// real-time loop: the tick count is computed up front and the
    /// pacer is consulted every tick, so the duration is bounded and
    /// the operation can be cancelled between any two ticks. Returns
    /// the number of ticks actually run.
    pub fn hold<S: FrameSink, P: TickPacer>(
        &mut self,
        session: &mut ProtocolSession,
        sink: &mut S,
        pacer: &mut P,
        channel: usize,
        value: u16,
        duration_ms: u32,
    ) -> Result<u32, ShaperError> {
        if duration_ms == 0 {
            return Err(ShaperError::InvalidDuration);
        }
        self.set_target(channel, value)?;
        let ticks = self.ticks_for(duration_ms);
        self.run_ticks(session, sink, pacer, ticks)
    }

    /// Ramp one channel linearly between two values over a duration.
    ///
    /// The interpolated value is fed through the normal shaping path,
    /// so slew limiting and grouping still apply.
    pub fn ramp<S: FrameSink, P: TickPacer>(
        &mut self,
        session: &mut ProtocolSession,
        sink: &mut S,
        pacer: &mut P,
        channel: usize,
        from: u16,
        to: u16,
        duration_ms: u32,
    ) -> Result<u32, ShaperError> {
        if duration_ms == 0 {
            return Err(ShaperError::InvalidDuration);
        }
        if channel >= COMMAND_CHANNELS {
            return Err(ShaperError::InvalidChannel);
        }

        let ticks = self.ticks_for(duration_ms);
        let from = from.min(VALUE_MAX) as i64;
        let to = to.min(VALUE_MAX) as i64;

        let mut completed = 0;
        for tick in 1..=ticks {
            let Some(now_ms) = pacer.next_tick() else {
                break;
            };
            let value = from + (to - from) * tick as i64 / ticks as i64;
            self.channels[channel].target = value as u16;
            self.step(session, sink, now_ms)?;
            completed += 1;
        }
        Ok(completed)
    }

    /// Bring every channel to neutral.
    ///
    /// With a positive `duration_ms` at least that long is spent; with
    /// zero, the tick count is derived from the largest deviation from
    /// neutral divided by the slew step, so the stop always completes
    /// in bounded time no matter what the caller asked for.
    pub fn emergency_stop<S: FrameSink, P: TickPacer>(
        &mut self,
        session: &mut ProtocolSession,
        sink: &mut S,
        pacer: &mut P,
        duration_ms: u32,
    ) -> Result<u32, ShaperError> {
        self.set_all_targets_neutral();

        let mid = VALUE_MID as i32;
        let mut max_deviation = 0;
        for state in &self.channels {
            max_deviation = max_deviation.max((state.current as i32 - mid).abs());
        }

        // In alternating mode each channel moves only every other tick.
        let ticks_per_move: u32 = match self.config.group_mode {
            GroupMode::All => 1,
            GroupMode::Alternate => 2,
        };
        let step = self.config.max_step as i32;
        let moves = (max_deviation + step - 1) / step;
        let ticks_by_deviation = (moves as u32 * ticks_per_move).max(1);

        let ticks = if duration_ms > 0 {
            self.ticks_for(duration_ms).max(ticks_by_deviation)
        } else {
            ticks_by_deviation
        };
        self.run_ticks(session, sink, pacer, ticks)
    }

    /// Current shadow values, targets, and tick count.
    pub fn snapshot(&self) -> ShaperSnapshot {
        let mut current = [0u16; COMMAND_CHANNELS];
        let mut target = [0u16; COMMAND_CHANNELS];
        for (channel, state) in self.channels.iter().enumerate() {
            current[channel] = state.current;
            target[channel] = state.target;
        }
        ShaperSnapshot {
            current,
            target,
            step_count: self.step_count,
        }
    }

    fn active_mask(&self) -> u8 {
        match self.config.group_mode {
            GroupMode::All => MASK_ALL,
            GroupMode::Alternate => {
                if self.use_group_b {
                    self.config.group_b
                } else {
                    self.config.group_a
                }
            }
        }
    }

    fn ticks_for(&self, duration_ms: u32) -> u32 {
        let ticks = (duration_ms as u64 * self.config.tick_hz as u64 + 500) / 1_000;
        ticks.clamp(1, u32::MAX as u64) as u32
    }

    fn run_ticks<S: FrameSink, P: TickPacer>(
        &mut self,
        session: &mut ProtocolSession,
        sink: &mut S,
        pacer: &mut P,
        ticks: u32,
    ) -> Result<u32, ShaperError> {
        let mut completed = 0;
        for _ in 0..ticks {
            let Some(now_ms) = pacer.next_tick() else {
                break;
            };
            self.step(session, sink, now_ms)?;
            completed += 1;
        }
        Ok(completed)
    }
}
