//! Daily sampling windows and the fire-once-per-day state machine.
//!
//! Each configured window is either Armed or Fired. The scheduler is polled
//! with fresh wall-clock samples; when a sample lands on an Armed window's
//! minute, that window flips to Fired and is reported as the tick's single
//! decision. Flags return to Armed when the calendar date of a sample differs
//! from the date of the last reset, which tolerates missed midnight polls,
//! restarts, and clock jumps once SNTP settles.
//!
//! Ties are resolved in configuration order: if two windows share a minute
//! only the first one fires and the others are marked Fired alongside it, so
//! they stay silent until the next rollover. Duplicate minutes are rejected at
//! configuration time; the tie-break only matters for tables built some other
//! way.

use core::fmt;

use heapless::{String, Vec};

use crate::calibration::Percent;
use crate::clock::{CalendarDate, LocalTime, TimeOfDay};

/// Upper bound on configured windows.
pub const MAX_WINDOWS: usize = 8;

/// Longest accepted publish topic.
pub const MAX_TOPIC_LEN: usize = 64;

/// Topic buffer stored per window.
pub type Topic = String<MAX_TOPIC_LEN>;

/// Identifier for a configured window (its position in configuration order).
pub type WindowIndex = usize;

/// Time-of-day at which one sample is published to `topic`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WindowSpec {
    pub at: TimeOfDay,
    pub topic: Topic,
}

impl WindowSpec {
    /// Builds a window spec.
    ///
    /// # Errors
    ///
    /// Fails when the time fields are out of range or the topic is too long
    /// or empty.
    pub fn new(hour: u8, minute: u8, topic: &str) -> Result<Self, ScheduleConfigError> {
        let at = TimeOfDay::new(hour, minute).ok_or(ScheduleConfigError::InvalidTime {
            hour,
            minute,
        })?;
        if topic.is_empty() {
            return Err(ScheduleConfigError::EmptyTopic);
        }
        let mut buffer = Topic::new();
        buffer
            .push_str(topic)
            .map_err(|_| ScheduleConfigError::TopicTooLong)?;
        Ok(Self { at, topic: buffer })
    }
}

/// Configuration errors surfaced while building the window table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleConfigError {
    InvalidTime { hour: u8, minute: u8 },
    EmptyTopic,
    TopicTooLong,
    DuplicateWindow(TimeOfDay),
    CapacityExceeded,
}

impl fmt::Display for ScheduleConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleConfigError::InvalidTime { hour, minute } => {
                write!(f, "invalid window time {hour}:{minute}")
            }
            ScheduleConfigError::EmptyTopic => f.write_str("window topic is empty"),
            ScheduleConfigError::TopicTooLong => {
                write!(f, "window topic exceeds {MAX_TOPIC_LEN} bytes")
            }
            ScheduleConfigError::DuplicateWindow(at) => write!(f, "duplicate window at {at}"),
            ScheduleConfigError::CapacityExceeded => {
                write!(f, "more than {MAX_WINDOWS} windows configured")
            }
        }
    }
}

/// Per-window lifecycle within a day.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WindowState {
    Armed,
    Fired,
}

/// Result of the publish attempt that followed a fire decision.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PublishOutcome {
    Delivered(Percent),
    Failed(Percent),
}

#[derive(Clone, Debug)]
struct WindowSlot {
    spec: WindowSpec,
    state: WindowState,
    last_outcome: Option<PublishOutcome>,
}

/// Decision returned when a window becomes due.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FireDecision {
    pub index: WindowIndex,
    pub at: TimeOfDay,
    pub date: CalendarDate,
}

/// What a single tick observed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickReport {
    /// Set when this tick re-armed the table for a new calendar day.
    pub rolled_over: Option<CalendarDate>,
    pub fire: Option<FireDecision>,
}

/// Read-only view of one window for status reporting.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WindowStatus<'a> {
    pub index: WindowIndex,
    pub spec: &'a WindowSpec,
    pub state: WindowState,
    pub last_outcome: Option<PublishOutcome>,
}

/// Fire-once-per-day scheduler over up to `CAPACITY` windows.
#[derive(Clone, Debug)]
pub struct WindowScheduler<const CAPACITY: usize = MAX_WINDOWS> {
    slots: Vec<WindowSlot, CAPACITY>,
    last_reset_day: Option<CalendarDate>,
}

impl<const CAPACITY: usize> WindowScheduler<CAPACITY> {
    /// Creates an empty scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            last_reset_day: None,
        }
    }

    /// Builds a scheduler from an ordered window list.
    ///
    /// # Errors
    ///
    /// Propagates the first [`push`](Self::push) failure.
    pub fn from_windows<I>(windows: I) -> Result<Self, ScheduleConfigError>
    where
        I: IntoIterator<Item = WindowSpec>,
    {
        let mut scheduler = Self::new();
        for window in windows {
            scheduler.push(window)?;
        }
        Ok(scheduler)
    }

    /// Appends a window in Armed state.
    ///
    /// # Errors
    ///
    /// Rejects duplicate (hour, minute) pairs and overflow of `CAPACITY`.
    pub fn push(&mut self, spec: WindowSpec) -> Result<WindowIndex, ScheduleConfigError> {
        if self.slots.iter().any(|slot| slot.spec.at == spec.at) {
            return Err(ScheduleConfigError::DuplicateWindow(spec.at));
        }
        let index = self.slots.len();
        self.slots
            .push(WindowSlot {
                spec,
                state: WindowState::Armed,
                last_outcome: None,
            })
            .map_err(|_| ScheduleConfigError::CapacityExceeded)?;
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn window(&self, index: WindowIndex) -> Option<&WindowSpec> {
        self.slots.get(index).map(|slot| &slot.spec)
    }

    #[must_use]
    pub fn state(&self, index: WindowIndex) -> Option<WindowState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Date of the last re-arm, `None` before the first valid tick.
    #[must_use]
    pub fn last_reset_day(&self) -> Option<CalendarDate> {
        self.last_reset_day
    }

    /// Iterates over every window with its current state.
    pub fn statuses(&self) -> impl Iterator<Item = WindowStatus<'_>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| WindowStatus {
                index,
                spec: &slot.spec,
                state: slot.state,
                last_outcome: slot.last_outcome,
            })
    }

    /// Evaluates one valid wall-clock sample.
    ///
    /// Re-arms every window when the calendar date differs from the last
    /// reset, then fires at most one Armed window matching the sample minute.
    pub fn tick(&mut self, now: &LocalTime) -> TickReport {
        let date = now.date();
        let rolled_over = if self.last_reset_day == Some(date) {
            None
        } else {
            let first_day = self.last_reset_day.is_none();
            self.rearm_all();
            self.last_reset_day = Some(date);
            // The very first tick only records the day; nothing was cleared.
            (!first_day).then_some(date)
        };

        let minute = now.time_of_day();
        let mut fire = None;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != WindowState::Armed || slot.spec.at != minute {
                continue;
            }
            slot.state = WindowState::Fired;
            if fire.is_none() {
                fire = Some(FireDecision {
                    index,
                    at: minute,
                    date,
                });
            }
        }

        TickReport { rolled_over, fire }
    }

    /// Records how the publish for a fired window went.
    ///
    /// The window stays Fired either way.
    pub fn record_outcome(&mut self, index: WindowIndex, outcome: PublishOutcome) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.last_outcome = Some(outcome);
        }
    }

    fn rearm_all(&mut self) {
        for slot in &mut self.slots {
            slot.state = WindowState::Armed;
        }
    }
}

impl<const CAPACITY: usize> Default for WindowScheduler<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u8, hour: u8, minute: u8) -> LocalTime {
        LocalTime::new(2024, 6, day, hour, minute, 0).expect("valid time")
    }

    fn three_windows() -> WindowScheduler {
        WindowScheduler::from_windows([
            WindowSpec::new(5, 0, "t1").unwrap(),
            WindowSpec::new(10, 0, "t2").unwrap(),
            WindowSpec::new(14, 0, "t3").unwrap(),
        ])
        .expect("valid schedule")
    }

    #[test]
    fn first_tick_records_day_without_reporting_rollover() {
        let mut scheduler = three_windows();
        assert_eq!(scheduler.last_reset_day(), None);

        let report = scheduler.tick(&at(1, 3, 12));
        assert_eq!(report.rolled_over, None);
        assert_eq!(report.fire, None);
        assert_eq!(scheduler.last_reset_day(), Some(CalendarDate::new(2024, 6, 1)));
    }

    #[test]
    fn window_fires_once_for_every_poll_in_its_minute() {
        let mut scheduler = three_windows();
        let mut fired = 0;
        for second in 0..60 {
            let now = LocalTime::new(2024, 6, 1, 5, 0, second).unwrap();
            if let Some(decision) = scheduler.tick(&now).fire {
                assert_eq!(decision.index, 0);
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(scheduler.state(0), Some(WindowState::Fired));
        assert_eq!(scheduler.state(1), Some(WindowState::Armed));
    }

    #[test]
    fn missed_midnight_still_rearms_on_next_day() {
        let mut scheduler = three_windows();
        assert!(scheduler.tick(&at(1, 14, 0)).fire.is_some());

        // First sample of the next day arrives well after midnight.
        let report = scheduler.tick(&at(2, 9, 42));
        assert_eq!(report.rolled_over, Some(CalendarDate::new(2024, 6, 2)));
        assert_eq!(report.fire, None);
        assert!(scheduler.statuses().all(|status| status.state == WindowState::Armed));
    }

    #[test]
    fn outcome_does_not_rearm_window() {
        let mut scheduler = three_windows();
        let decision = scheduler.tick(&at(1, 10, 0)).fire.expect("fires");
        scheduler.record_outcome(decision.index, PublishOutcome::Failed(Percent::MIN));

        assert_eq!(scheduler.state(decision.index), Some(WindowState::Fired));
        assert_eq!(scheduler.tick(&at(1, 10, 0)).fire, None);
        let status = scheduler.statuses().nth(1).expect("window 1");
        assert_eq!(status.last_outcome, Some(PublishOutcome::Failed(Percent::MIN)));
    }

    #[test]
    fn rejects_duplicate_minutes_and_overflow() {
        let mut scheduler = WindowScheduler::<2>::new();
        scheduler.push(WindowSpec::new(5, 0, "a").unwrap()).unwrap();
        assert_eq!(
            scheduler.push(WindowSpec::new(5, 0, "b").unwrap()),
            Err(ScheduleConfigError::DuplicateWindow(TimeOfDay::new(5, 0).unwrap()))
        );
        scheduler.push(WindowSpec::new(6, 0, "b").unwrap()).unwrap();
        assert_eq!(
            scheduler.push(WindowSpec::new(7, 0, "c").unwrap()),
            Err(ScheduleConfigError::CapacityExceeded)
        );
    }

    #[test]
    fn rejects_bad_window_fields() {
        assert_eq!(
            WindowSpec::new(24, 0, "t"),
            Err(ScheduleConfigError::InvalidTime { hour: 24, minute: 0 })
        );
        assert_eq!(WindowSpec::new(1, 0, ""), Err(ScheduleConfigError::EmptyTopic));
        let long = [b'x'; MAX_TOPIC_LEN + 1];
        let long = core::str::from_utf8(&long).unwrap();
        assert_eq!(WindowSpec::new(1, 0, long), Err(ScheduleConfigError::TopicTooLong));
    }

    #[test]
    fn shared_minute_resolves_to_first_configured_window() {
        // Bypass `push` validation to exercise the tie-break directly.
        let mut scheduler = three_windows();
        let duplicate = WindowSlot {
            spec: WindowSpec::new(5, 0, "dup").unwrap(),
            state: WindowState::Armed,
            last_outcome: None,
        };
        scheduler.slots.push(duplicate).unwrap();

        let first = scheduler.tick(&at(1, 5, 0)).fire.expect("first fires");
        assert_eq!(first.index, 0);
        assert_eq!(scheduler.state(3), Some(WindowState::Fired));
        assert_eq!(scheduler.tick(&at(1, 5, 0)).fire, None);

        let next_day = scheduler.tick(&at(2, 5, 0));
        assert_eq!(next_day.fire.map(|decision| decision.index), Some(0));
    }
}
