//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! Events carry compact numeric codes so they can be mirrored over diagnostics
//! channels, and payloads keep the reading that accompanied a publish attempt.
//! Everything stays `no_std`; timestamps are whatever monotonic instant the
//! caller owns.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::calibration::{Percent, RawSample};
use crate::clock::CalendarDate;
use crate::readiness::{ReadinessFlag, ReadinessFlags};
use crate::sampler::TickOutcome;
use crate::schedule::WindowIndex;

/// Identifier used when tracking emitted telemetry events.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events shared across all targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    ReadinessUp(ReadinessFlag),
    ReadinessDown(ReadinessFlag),
    ClockInvalid,
    DayRollover,
    WindowFired(u8),
    PublishDelivered(u8),
    PublishFailed(u8),
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ReadinessUp(flag) => write!(f, "{flag}-up"),
            TelemetryEventKind::ReadinessDown(flag) => write!(f, "{flag}-down"),
            TelemetryEventKind::ClockInvalid => f.write_str("clock-invalid"),
            TelemetryEventKind::DayRollover => f.write_str("day-rollover"),
            TelemetryEventKind::WindowFired(index) => write!(f, "window-fired {index}"),
            TelemetryEventKind::PublishDelivered(index) => write!(f, "publish-delivered {index}"),
            TelemetryEventKind::PublishFailed(index) => write!(f, "publish-failed {index}"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const READINESS_UP_BASE: u16 = 0x0000;
    const READINESS_DOWN_BASE: u16 = 0x0002;
    const CLOCK_INVALID_CODE: u16 = 0x0008;
    const DAY_ROLLOVER_CODE: u16 = 0x0009;
    const WINDOW_FIRED_BASE: u16 = 0x0100;
    const PUBLISH_DELIVERED_BASE: u16 = 0x0200;
    const PUBLISH_FAILED_BASE: u16 = 0x0300;
    const WINDOW_CODE_SPAN: u16 = 0x0100;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::ReadinessUp(flag) => Self::READINESS_UP_BASE + flag_index(flag),
            TelemetryEventKind::ReadinessDown(flag) => {
                Self::READINESS_DOWN_BASE + flag_index(flag)
            }
            TelemetryEventKind::ClockInvalid => Self::CLOCK_INVALID_CODE,
            TelemetryEventKind::DayRollover => Self::DAY_ROLLOVER_CODE,
            TelemetryEventKind::WindowFired(index) => Self::WINDOW_FIRED_BASE + u16::from(index),
            TelemetryEventKind::PublishDelivered(index) => {
                Self::PUBLISH_DELIVERED_BASE + u16::from(index)
            }
            TelemetryEventKind::PublishFailed(index) => {
                Self::PUBLISH_FAILED_BASE + u16::from(index)
            }
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::CLOCK_INVALID_CODE => TelemetryEventKind::ClockInvalid,
            Self::DAY_ROLLOVER_CODE => TelemetryEventKind::DayRollover,
            value if (Self::READINESS_UP_BASE..Self::READINESS_DOWN_BASE).contains(&value) => {
                flag_from_index(value - Self::READINESS_UP_BASE)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::ReadinessUp)
            }
            value
                if (Self::READINESS_DOWN_BASE..Self::READINESS_DOWN_BASE + 2).contains(&value) =>
            {
                flag_from_index(value - Self::READINESS_DOWN_BASE).map_or(
                    TelemetryEventKind::Custom(value),
                    TelemetryEventKind::ReadinessDown,
                )
            }
            value => match (value / Self::WINDOW_CODE_SPAN, window_offset(value)) {
                (1, Some(index)) => TelemetryEventKind::WindowFired(index),
                (2, Some(index)) => TelemetryEventKind::PublishDelivered(index),
                (3, Some(index)) => TelemetryEventKind::PublishFailed(index),
                _ => TelemetryEventKind::Custom(value),
            },
        }
    }
}

const fn flag_index(flag: ReadinessFlag) -> u16 {
    match flag {
        ReadinessFlag::Link => 0,
        ReadinessFlag::Session => 1,
    }
}

const fn flag_from_index(index: u16) -> Option<ReadinessFlag> {
    match index {
        0 => Some(ReadinessFlag::Link),
        1 => Some(ReadinessFlag::Session),
        _ => None,
    }
}

fn window_offset(code: u16) -> Option<u8> {
    u8::try_from(code % TelemetryEventKind::WINDOW_CODE_SPAN).ok()
}

fn window_code(index: WindowIndex) -> u8 {
    u8::try_from(index).unwrap_or(u8::MAX)
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Flag set after a readiness notification.
    Readiness(ReadinessFlags),
    /// New calendar day after a re-arm.
    Rollover(CalendarDate),
    /// Reading attached to a publish attempt.
    Reading(ReadingTelemetry),
}

/// Reading captured for a publish attempt.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReadingTelemetry {
    pub raw: RawSample,
    pub value: Percent,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a readiness notification together with the resulting flag set.
    pub fn record_readiness(
        &mut self,
        flag: ReadinessFlag,
        up: bool,
        flags: ReadinessFlags,
        timestamp: TInstant,
    ) -> EventId {
        let event = if up {
            TelemetryEventKind::ReadinessUp(flag)
        } else {
            TelemetryEventKind::ReadinessDown(flag)
        };
        self.record(event, TelemetryPayload::Readiness(flags), timestamp)
    }

    /// Records everything a sampler iteration decided.
    ///
    /// Returns the identifier of the last record written, if any.
    pub fn record_outcome(
        &mut self,
        outcome: &TickOutcome,
        timestamp: TInstant,
    ) -> Option<EventId> {
        match *outcome {
            TickOutcome::ClockInvalid => {
                Some(self.record(
                    TelemetryEventKind::ClockInvalid,
                    TelemetryPayload::None,
                    timestamp,
                ))
            }
            TickOutcome::Evaluated { report, publish } => {
                let mut last = None;
                if let Some(date) = report.rolled_over {
                    last = Some(self.record(
                        TelemetryEventKind::DayRollover,
                        TelemetryPayload::Rollover(date),
                        timestamp,
                    ));
                }
                if let Some(decision) = report.fire {
                    let index = window_code(decision.index);
                    last = Some(self.record(
                        TelemetryEventKind::WindowFired(index),
                        TelemetryPayload::None,
                        timestamp,
                    ));
                    if let Some(attempt) = publish {
                        let event = if attempt.delivered {
                            TelemetryEventKind::PublishDelivered(index)
                        } else {
                            TelemetryEventKind::PublishFailed(index)
                        };
                        let reading = ReadingTelemetry {
                            raw: attempt.raw,
                            value: attempt.value,
                        };
                        last = Some(self.record(
                            event,
                            TelemetryPayload::Reading(reading),
                            timestamp,
                        ));
                    }
                }
                last
            }
        }
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeOfDay;
    use crate::sampler::PublishAttempt;
    use crate::schedule::{FireDecision, TickReport};

    #[test]
    fn raw_codes_round_trip_for_known_events() {
        let events = [
            TelemetryEventKind::ReadinessUp(ReadinessFlag::Link),
            TelemetryEventKind::ReadinessUp(ReadinessFlag::Session),
            TelemetryEventKind::ReadinessDown(ReadinessFlag::Link),
            TelemetryEventKind::ReadinessDown(ReadinessFlag::Session),
            TelemetryEventKind::ClockInvalid,
            TelemetryEventKind::DayRollover,
            TelemetryEventKind::WindowFired(2),
            TelemetryEventKind::PublishDelivered(0),
            TelemetryEventKind::PublishFailed(7),
        ];
        for event in events {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
        assert_eq!(TelemetryEventKind::from_raw(0x0042), TelemetryEventKind::Custom(0x0042));
        assert_eq!(TelemetryEventKind::from_raw(0x0900), TelemetryEventKind::Custom(0x0900));
    }

    #[test]
    fn publish_outcome_records_fire_then_result() {
        let mut recorder = TelemetryRecorder::<u64>::new();
        let date = CalendarDate::new(2024, 6, 2);
        let outcome = TickOutcome::Evaluated {
            report: TickReport {
                rolled_over: Some(date),
                fire: Some(FireDecision {
                    index: 1,
                    at: TimeOfDay::new(10, 0).unwrap(),
                    date,
                }),
            },
            publish: Some(PublishAttempt {
                index: 1,
                raw: 4095,
                value: Percent::MIN,
                delivered: false,
            }),
        };

        let last = recorder.record_outcome(&outcome, 42);
        assert_eq!(last, Some(2));
        let events: heapless::Vec<TelemetryEventKind, 4> =
            recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[
                TelemetryEventKind::DayRollover,
                TelemetryEventKind::WindowFired(1),
                TelemetryEventKind::PublishFailed(1),
            ]
        );
        assert!(matches!(
            recorder.latest().map(|record| record.details),
            Some(TelemetryPayload::Reading(ReadingTelemetry { raw: 4095, .. }))
        ));
    }

    #[test]
    fn quiet_tick_records_nothing() {
        let mut recorder = TelemetryRecorder::<u64>::new();
        let outcome = TickOutcome::Evaluated {
            report: TickReport {
                rolled_over: None,
                fire: None,
            },
            publish: None,
        };
        assert_eq!(recorder.record_outcome(&outcome, 0), None);
        assert!(recorder.is_empty());
    }
}
