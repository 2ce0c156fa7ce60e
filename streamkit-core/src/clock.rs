//! Monotonic clock and per-track time-base arithmetic.
//!
//! Every muxer deals in at least two time domains: the encoder's microsecond
//! PTS/DTS base, and the container's own timescale (90 kHz for MPEG-TS and
//! video MP4 tracks, the sample rate for audio MP4 tracks, milliseconds for
//! FLV). `TimeBase` and `rescale` keep that arithmetic in one place instead
//! of scattered multiply-divide pairs.

use std::time::Instant;

/// Ticks-per-second for one time domain (e.g. 90_000 for MPEG-TS, 48_000 for
/// 48 kHz audio, 1_000_000 for the encoder's microsecond base).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBase(pub u64);

impl TimeBase {
    pub const MICROS: TimeBase = TimeBase(1_000_000);
    pub const MPEGTS_90K: TimeBase = TimeBase(90_000);
    pub const MILLIS: TimeBase = TimeBase(1_000);

    pub fn new(ticks_per_second: u64) -> Self {
        assert!(ticks_per_second > 0, "time base must be positive");
        TimeBase(ticks_per_second)
    }
}

/// Rescale a timestamp from one time base to another using a 128-bit
/// intermediate product so that large PTS values (days of 90 kHz ticks)
/// never overflow before the division.
pub fn rescale(value: i64, from: TimeBase, to: TimeBase) -> i64 {
    if from.0 == to.0 {
        return value;
    }
    let num = value as i128 * to.0 as i128;
    let den = from.0 as i128;
    // Round to nearest, ties away from zero, matching common muxer behavior
    // (libavutil's av_rescale_rnd with AV_ROUND_NEAR_INF).
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded as i64
}

/// Source of monotonic, microsecond-resolution timestamps. Injectable so
/// tests can supply a deterministic clock instead of reading the OS clock.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Default clock backed by `std::time::Instant`, anchored at construction.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }
}

/// A fixed/steppable clock for deterministic tests.
pub struct TestClock {
    us: parking_lot::Mutex<i64>,
}

impl TestClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            us: parking_lot::Mutex::new(start_us),
        }
    }

    pub fn advance(&self, delta_us: i64) {
        *self.us.lock() += delta_us;
    }

    pub fn set(&self, us: i64) {
        *self.us.lock() = us;
    }
}

impl Clock for TestClock {
    fn now_us(&self) -> i64 {
        *self.us.lock()
    }
}

/// PTS/DTS pair carried by a `Frame`. `dts` defaults to `pts` when the
/// encoder does not distinguish them (spec invariant: `dts <= pts`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub pts_us: i64,
    pub dts_us: i64,
}

impl Timestamps {
    pub fn new(pts_us: i64, dts_us: Option<i64>) -> Self {
        let dts_us = dts_us.unwrap_or(pts_us);
        Timestamps { pts_us, dts_us }
    }
}
