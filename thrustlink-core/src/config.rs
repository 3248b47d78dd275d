//! Configuration type definitions.
//!
//! Configuration is built by the endpoint runtime (CLI flags, embedded
//! defaults) and passed in at construction. Numeric fields that are
//! zero or out of range are repaired to defaults by
//! [`normalized`](ShaperConfig::normalized) rather than rejected, so a
//! partially filled config always yields a runnable engine.

use thrustlink_protocol::VALUE_MAX;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default loss-of-link timeout.
pub const DEFAULT_FAILSAFE_TIMEOUT_MS: u32 = 300;

/// Hard floor for the failsafe timeout. Anything lower would trip on
/// ordinary scheduling jitter and pin the outputs at neutral.
pub const FAILSAFE_TIMEOUT_FLOOR_MS: u32 = 50;

/// Default heartbeat probe period.
pub const DEFAULT_HEARTBEAT_PERIOD_MS: u32 = 1_000;

/// Default control loop rate.
pub const DEFAULT_TICK_HZ: u16 = 50;

/// Default slew limit in magnitude units per tick (0.2 % duty).
pub const DEFAULT_MAX_STEP: u16 = 400;

/// Channel mask selecting every channel.
pub const MASK_ALL: u8 = 0xFF;

/// Default group A: channels 0-3.
pub const MASK_GROUP_A: u8 = 0x0F;

/// Default group B: channels 4-7.
pub const MASK_GROUP_B: u8 = 0xF0;

/// How the shaper spreads channel updates across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GroupMode {
    /// Every channel may move on every tick.
    All,
    /// Group A moves on one tick, group B on the next. Halves the
    /// simultaneous current draw of eight thrusters spinning up.
    #[default]
    Alternate,
}

/// Link-level settings shared by both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkConfig {
    /// Silence on the liveness-bearing kinds longer than this trips the
    /// failsafe. Floored at [`FAILSAFE_TIMEOUT_FLOOR_MS`].
    pub failsafe_timeout_ms: u32,
    /// How often the host probes with a heartbeat.
    pub heartbeat_period_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            failsafe_timeout_ms: DEFAULT_FAILSAFE_TIMEOUT_MS,
            heartbeat_period_ms: DEFAULT_HEARTBEAT_PERIOD_MS,
        }
    }
}

impl LinkConfig {
    /// Repair out-of-range fields to usable values.
    pub fn normalized(mut self) -> Self {
        if self.failsafe_timeout_ms < FAILSAFE_TIMEOUT_FLOOR_MS {
            self.failsafe_timeout_ms = FAILSAFE_TIMEOUT_FLOOR_MS;
        }
        if self.heartbeat_period_ms == 0 {
            self.heartbeat_period_ms = DEFAULT_HEARTBEAT_PERIOD_MS;
        }
        self
    }
}

/// Command shaper settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShaperConfig {
    /// Control loop rate used to size the blocking helpers.
    pub tick_hz: u16,
    /// Largest per-tick change of one channel, in magnitude units.
    pub max_step: u16,
    /// Require convergence through neutral before changing thrust
    /// direction.
    pub reverse_protection: bool,
    /// Update scheduling across channels.
    pub group_mode: GroupMode,
    /// Channels updated on A ticks (bit n = channel n).
    pub group_a: u8,
    /// Channels updated on B ticks.
    pub group_b: u8,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            max_step: DEFAULT_MAX_STEP,
            reverse_protection: true,
            group_mode: GroupMode::Alternate,
            group_a: MASK_GROUP_A,
            group_b: MASK_GROUP_B,
        }
    }
}

impl ShaperConfig {
    /// Repair out-of-range fields to usable values.
    ///
    /// A zero `max_step` means "no slew limiting" and becomes the full
    /// value range; empty group masks fall back to the 4+4 split.
    pub fn normalized(mut self) -> Self {
        if self.tick_hz == 0 {
            self.tick_hz = DEFAULT_TICK_HZ;
        }
        if self.max_step == 0 {
            self.max_step = VALUE_MAX;
        }
        if self.group_a == 0 && self.group_b == 0 {
            self.group_a = MASK_GROUP_A;
            self.group_b = MASK_GROUP_B;
        }
        self
    }

    /// Control tick period in milliseconds.
    pub fn tick_period_ms(&self) -> u32 {
        1_000 / self.tick_hz.max(1) as u32
    }
}
