#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Wall clock extrapolated from SNTP reports.
//!
//! The modem task stores the last plausible `+CIPSNTPTIME` report together
//! with the monotonic instant it arrived at. The sampler reads local time by
//! adding the monotonic time elapsed since then.

use embassy_time::Instant;
use portable_atomic::{AtomicI64, AtomicU64, Ordering};
use sampler_core::clock::{ClockSource, LocalTime};

/// Local seconds since 1970 carried by the last accepted report.
static SYNC_LOCAL_SECONDS: AtomicI64 = AtomicI64::new(0);
/// Monotonic timestamp (µs, +1) of the last accepted report; 0 == never.
static SYNC_AT_MICROS: AtomicU64 = AtomicU64::new(0);

/// One accepted clock report anchored to the monotonic clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyncPoint {
    pub local_seconds: i64,
    pub at: Instant,
}

impl SyncPoint {
    /// Anchors `time` at `at`, rejecting reports from an unsynchronized
    /// co-processor.
    pub fn from_report(time: &LocalTime, at: Instant) -> Option<Self> {
        time.is_plausible().then(|| Self {
            local_seconds: time.to_local_seconds(),
            at,
        })
    }

    /// Extrapolated local time at `now`.
    pub fn local_time_at(&self, now: Instant) -> Option<LocalTime> {
        let elapsed = now.checked_duration_since(self.at)?.as_secs();
        let elapsed = i64::try_from(elapsed).ok()?;
        LocalTime::from_local_seconds(self.local_seconds.checked_add(elapsed)?)
    }
}

fn encode_micros(micros: u64) -> u64 {
    micros.wrapping_add(1)
}

fn decode_micros(raw: u64) -> Option<u64> {
    if raw == 0 {
        None
    } else {
        Some(raw.wrapping_sub(1))
    }
}

/// Stores a report; returns `false` when it was rejected as unsynchronized.
pub fn record_report(time: &LocalTime, at: Instant) -> bool {
    let Some(point) = SyncPoint::from_report(time, at) else {
        return false;
    };
    // Writer and readers share the thread-mode executor, so the pair is never
    // observed half written.
    SYNC_LOCAL_SECONDS.store(point.local_seconds, Ordering::Relaxed);
    SYNC_AT_MICROS.store(encode_micros(point.at.as_micros()), Ordering::Release);
    true
}

/// Last accepted report, if any.
pub fn sync_point() -> Option<SyncPoint> {
    let micros = decode_micros(SYNC_AT_MICROS.load(Ordering::Acquire))?;
    Some(SyncPoint {
        local_seconds: SYNC_LOCAL_SECONDS.load(Ordering::Relaxed),
        at: Instant::from_micros(micros),
    })
}

/// [`ClockSource`] backed by the shared sync point.
#[derive(Copy, Clone, Debug, Default)]
pub struct SyncedClock;

impl ClockSource for SyncedClock {
    fn local_time(&mut self) -> Option<LocalTime> {
        sync_point()?.local_time_at(Instant::now())
    }
}
