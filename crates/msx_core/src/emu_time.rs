/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    core::emu_time.rs

    Defines the virtual time base shared by every time-driven device.

    EmuTime is an absolute, monotonic tick count at MAIN_FREQ ticks per second.
    EmuDuration is a signed difference between two EmuTimes. A Clock<FREQ>
    adapts the global tick count to a device-local clock running at FREQ Hz.

    MAIN_FREQ is chosen so that the Z80 clock, the VDP master clock, 1MHz, 1kHz
    and the floppy byte clock (31250 bytes/s) all divide it exactly. At this
    resolution a u64 tick count lasts roughly 99 days of emulated time.
*/

use serde_derive::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

/// Global time base resolution in ticks per second.
pub const MAIN_FREQ: u64 = 3_579_545 * 960 * 625;

/// Frequency of the MSX Z80 CPU clock.
pub const Z80_FREQ: u64 = 3_579_545;

/// A signed span of virtual time, in main ticks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EmuDuration(i64);

impl EmuDuration {
    pub const ZERO: EmuDuration = EmuDuration(0);

    pub const fn from_ticks(ticks: i64) -> Self {
        EmuDuration(ticks)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Return the duration of `n` periods of a clock running at `freq` Hz.
    /// The conversion is exact for any frequency that divides MAIN_FREQ; other frequencies
    /// are rounded to the nearest main tick.
    pub fn from_units(n: i64, freq: u64) -> Self {
        assert!(freq > 0, "clock frequency must be non-zero");
        if MAIN_FREQ % freq == 0 {
            EmuDuration(n * (MAIN_FREQ / freq) as i64)
        }
        else {
            let half = (freq / 2) as i128 * n.signum() as i128;
            EmuDuration(((n as i128 * MAIN_FREQ as i128 + half) / freq as i128) as i64)
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::from_units(ms as i64, 1_000)
    }

    pub fn from_micros(us: u64) -> Self {
        Self::from_units(us as i64, 1_000_000)
    }

    /// Return the number of whole periods of a `freq` Hz clock contained in this duration,
    /// truncated toward zero.
    pub fn as_units(self, freq: u64) -> i64 {
        ((self.0 as i128 * freq as i128) / MAIN_FREQ as i128) as i64
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MAIN_FREQ as f64
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Add for EmuDuration {
    type Output = EmuDuration;
    fn add(self, rhs: EmuDuration) -> EmuDuration {
        EmuDuration(self.0 + rhs.0)
    }
}

impl Sub for EmuDuration {
    type Output = EmuDuration;
    fn sub(self, rhs: EmuDuration) -> EmuDuration {
        EmuDuration(self.0 - rhs.0)
    }
}

impl Neg for EmuDuration {
    type Output = EmuDuration;
    fn neg(self) -> EmuDuration {
        EmuDuration(-self.0)
    }
}

impl Mul<i64> for EmuDuration {
    type Output = EmuDuration;
    fn mul(self, rhs: i64) -> EmuDuration {
        EmuDuration(self.0 * rhs)
    }
}

impl AddAssign for EmuDuration {
    fn add_assign(&mut self, rhs: EmuDuration) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for EmuDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}us", self.as_secs_f64() * 1_000_000.0)
    }
}

/// An absolute point in virtual time, in main ticks since the start of the session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EmuTime(u64);

impl EmuTime {
    pub const ZERO: EmuTime = EmuTime(0);
    /// A time that is never reached. Used by drives to report an event that will not happen,
    /// such as an index pulse with no disk inserted.
    pub const INFINITY: EmuTime = EmuTime(u64::MAX);

    pub const fn from_ticks(ticks: u64) -> Self {
        EmuTime(ticks)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    pub fn is_infinity(self) -> bool {
        self.0 == u64::MAX
    }

    /// Return the number of whole periods of a `freq` Hz clock that elapse between this time
    /// and `later`. Returns 0 if `later` does not come after this time.
    pub fn elapsed_units(self, later: EmuTime, freq: u64) -> u64 {
        if later <= self {
            return 0;
        }
        ((later.0 - self.0) as u128 * freq as u128 / MAIN_FREQ as u128) as u64
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MAIN_FREQ as f64
    }
}

impl Add<EmuDuration> for EmuTime {
    type Output = EmuTime;
    fn add(self, rhs: EmuDuration) -> EmuTime {
        if self.is_infinity() {
            return self;
        }
        let t = self.0 as i128 + rhs.0 as i128;
        debug_assert!(t >= 0 && t < u64::MAX as i128, "EmuTime out of range: {}", t);
        EmuTime(t.clamp(0, (u64::MAX - 1) as i128) as u64)
    }
}

impl Sub<EmuDuration> for EmuTime {
    type Output = EmuTime;
    fn sub(self, rhs: EmuDuration) -> EmuTime {
        self + (-rhs)
    }
}

impl AddAssign<EmuDuration> for EmuTime {
    fn add_assign(&mut self, rhs: EmuDuration) {
        *self = *self + rhs;
    }
}

impl SubAssign<EmuDuration> for EmuTime {
    fn sub_assign(&mut self, rhs: EmuDuration) {
        *self = *self - rhs;
    }
}

impl Sub for EmuTime {
    type Output = EmuDuration;
    fn sub(self, rhs: EmuTime) -> EmuDuration {
        EmuDuration((self.0 as i128 - rhs.0 as i128) as i64)
    }
}

impl fmt::Display for EmuTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            write!(f, "inf")
        }
        else {
            write!(f, "{:.9}s", self.as_secs_f64())
        }
    }
}

/// A device-local clock running at FREQ Hz, anchored at the time of its last tick.
///
/// FREQ must divide MAIN_FREQ; this is checked at compile time when the clock's period is
/// first used.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock<const FREQ: u64> {
    last_tick: EmuTime,
}

impl<const FREQ: u64> Clock<FREQ> {
    /// Length of one clock period in main ticks.
    pub const STEP: u64 = {
        assert!(FREQ > 0 && MAIN_FREQ % FREQ == 0, "clock frequency must divide MAIN_FREQ");
        MAIN_FREQ / FREQ
    };

    pub const fn new(time: EmuTime) -> Self {
        Self { last_tick: time }
    }

    pub fn time(&self) -> EmuTime {
        self.last_tick
    }

    pub fn reset(&mut self, time: EmuTime) {
        self.last_tick = time;
    }

    /// Return the duration of `n` periods of this clock.
    pub fn duration(n: u64) -> EmuDuration {
        EmuDuration((n * Self::STEP) as i64)
    }

    /// Is the last tick strictly before `time`?
    pub fn before(&self, time: EmuTime) -> bool {
        self.last_tick < time
    }

    /// Return the number of whole periods between the last tick and `time`.
    pub fn ticks_till(&self, time: EmuTime) -> u64 {
        if time <= self.last_tick {
            return 0;
        }
        (time.0 - self.last_tick.0) / Self::STEP
    }

    /// Move the last tick forward by as many whole periods as fit before `time`.
    pub fn advance(&mut self, time: EmuTime) {
        let ticks = self.ticks_till(time);
        self.last_tick = EmuTime(self.last_tick.0 + ticks * Self::STEP);
    }

    pub fn add_ticks(&mut self, n: u64) {
        self.last_tick = EmuTime(self.last_tick.0 + n * Self::STEP);
    }

    /// Return the time of the tick `n` periods after the last tick.
    pub fn tick_time(&self, n: u64) -> EmuTime {
        EmuTime(self.last_tick.0 + n * Self::STEP)
    }
}

impl<const FREQ: u64> AddAssign<u64> for Clock<FREQ> {
    fn add_assign(&mut self, n: u64) {
        self.add_ticks(n);
    }
}
