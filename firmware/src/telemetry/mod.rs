//! Telemetry ring ownership and log helpers.
//!
//! The sampler task owns the ring and records every loop outcome into it.
//! Every helper mirrors to defmt on target and stdout on host builds.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_time::Instant;
use sampler_core::clock::LocalTime;
use sampler_core::readiness::{ReadinessFlag, ReadinessFlags};
use sampler_core::sampler::{PublishAttempt, TickOutcome};
use sampler_core::telemetry::{self as core_telemetry, EventId};

/// Telemetry ring keyed by the embassy monotonic clock.
pub type TelemetryRecorder = core_telemetry::TelemetryRecorder<Instant>;

/// Records a loop outcome and logs what happened.
pub fn record_outcome(
    recorder: &mut TelemetryRecorder,
    outcome: &TickOutcome,
    timestamp: Instant,
) -> Option<EventId> {
    let id = recorder.record_outcome(outcome, timestamp);
    let timestamp_us = timestamp.as_micros();

    match outcome {
        TickOutcome::ClockInvalid => log_clock_invalid(timestamp_us),
        TickOutcome::Evaluated { report, publish } => {
            if let Some(date) = report.rolled_over {
                log_rollover(date.year, date.month, date.day, timestamp_us);
            }
            if let Some(attempt) = publish {
                log_publish(attempt, timestamp_us);
            }
        }
    }
    id
}

/// Logs a readiness transition observed by the modem task.
pub fn log_readiness(flag: ReadinessFlag, up: bool, flags: ReadinessFlags) {
    emit_readiness(flag.label(), up, flags.all_ready());
}

/// Logs an SNTP report and whether it was accepted.
pub fn log_sntp_report(time: &LocalTime, accepted: bool) {
    emit_sntp(
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second(),
        accepted,
    );
}

fn log_publish(attempt: &PublishAttempt, timestamp_us: u64) {
    // Hundredths keep defmt free of float formatting.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hundredths = (attempt.value.value() * 100.0) as u32;
    emit_publish(
        attempt.index,
        attempt.raw,
        hundredths,
        attempt.delivered,
        timestamp_us,
    );
}

#[cfg(target_os = "none")]
fn log_clock_invalid(timestamp_us: u64) {
    defmt::warn!(
        "sampler: clock not synchronized, backing off t={}us",
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn log_clock_invalid(timestamp_us: u64) {
    println!("sampler: clock not synchronized, backing off t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn log_rollover(year: u16, month: u8, day: u8, timestamp_us: u64) {
    defmt::info!(
        "sampler: new day {=u16}-{=u8}-{=u8}, windows re-armed t={}us",
        year,
        month,
        day,
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn log_rollover(year: u16, month: u8, day: u8, timestamp_us: u64) {
    println!("sampler: new day {year:04}-{month:02}-{day:02}, windows re-armed t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn emit_publish(index: usize, raw: i32, hundredths: u32, delivered: bool, timestamp_us: u64) {
    if delivered {
        defmt::info!(
            "sampler: window {} published raw={} value={=u32}e-2% t={}us",
            index,
            raw,
            hundredths,
            timestamp_us
        );
    } else {
        defmt::warn!(
            "sampler: window {} publish failed raw={} value={=u32}e-2% t={}us",
            index,
            raw,
            hundredths,
            timestamp_us
        );
    }
}

#[cfg(not(target_os = "none"))]
fn emit_publish(index: usize, raw: i32, hundredths: u32, delivered: bool, timestamp_us: u64) {
    let whole = hundredths / 100;
    let frac = hundredths % 100;
    let verb = if delivered { "published" } else { "publish failed" };
    println!(
        "sampler: window {index} {verb} raw={raw} value={whole}.{frac:02}% \
         t={timestamp_us}us"
    );
}

#[cfg(target_os = "none")]
fn emit_readiness(label: &'static str, up: bool, all_ready: bool) {
    if up {
        defmt::info!("modem: {} up (all ready: {})", label, all_ready);
    } else {
        defmt::warn!("modem: {} down", label);
    }
}

#[cfg(not(target_os = "none"))]
fn emit_readiness(label: &'static str, up: bool, all_ready: bool) {
    if up {
        println!("modem: {label} up (all ready: {all_ready})");
    } else {
        println!("modem: {label} down");
    }
}

#[cfg(target_os = "none")]
fn emit_sntp(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, accepted: bool) {
    if accepted {
        defmt::debug!(
            "modem: sntp {=u16}-{=u8}-{=u8} {=u8}:{=u8}:{=u8}",
            year,
            month,
            day,
            hour,
            minute,
            second
        );
    } else {
        defmt::debug!("modem: sntp not synchronized yet (year {})", year);
    }
}

#[cfg(not(target_os = "none"))]
fn emit_sntp(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, accepted: bool) {
    if accepted {
        println!("modem: sntp {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
    } else {
        println!("modem: sntp not synchronized yet (year {year})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampler_core::calibration::Percent;
    use sampler_core::clock::{CalendarDate, TimeOfDay};
    use sampler_core::schedule::{FireDecision, TickReport};
    use sampler_core::telemetry::TelemetryEventKind;

    #[test]
    fn failed_publish_lands_in_ring() {
        let mut recorder = TelemetryRecorder::new();
        let outcome = TickOutcome::Evaluated {
            report: TickReport {
                rolled_over: None,
                fire: Some(FireDecision {
                    index: 0,
                    at: TimeOfDay::new(10, 0).expect("valid time"),
                    date: CalendarDate::new(2024, 6, 2),
                }),
            },
            publish: Some(PublishAttempt {
                index: 0,
                raw: 4095,
                value: Percent::MIN,
                delivered: false,
            }),
        };

        let id = record_outcome(&mut recorder, &outcome, Instant::from_secs(3));
        assert!(id.is_some());
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TelemetryEventKind::PublishFailed(0))
        );
    }

    #[test]
    fn clock_invalid_is_recorded() {
        let mut recorder = TelemetryRecorder::new();
        record_outcome(&mut recorder, &TickOutcome::ClockInvalid, Instant::from_secs(1));
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TelemetryEventKind::ClockInvalid)
        );
    }
}
