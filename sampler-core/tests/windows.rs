use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use sampler_core::calibration::{Calibration, RawSample};
use sampler_core::clock::{ClockSource, LocalTime};
use sampler_core::readiness::{ReadinessFlag, ReadinessTracker};
use sampler_core::sampler::{Publisher, QoS, SampleSource, Sampler, SamplerConfig, TickOutcome};
use sampler_core::schedule::{WindowScheduler, WindowSpec, WindowState};

#[derive(Default)]
struct ScriptedClock {
    now: Option<LocalTime>,
}

impl ScriptedClock {
    fn set(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8) {
        self.now = LocalTime::new(year, month, day, hour, minute, 0);
    }
}

impl ClockSource for ScriptedClock {
    fn local_time(&mut self) -> Option<LocalTime> {
        self.now
    }
}

#[derive(Default)]
struct ScriptedProbe {
    raw: RawSample,
}

impl SampleSource for ScriptedProbe {
    fn read_raw(&mut self) -> RawSample {
        self.raw
    }
}

#[derive(Default)]
struct BrokerLog {
    messages: Vec<(String, String)>,
}

impl Publisher for BrokerLog {
    type Error = core::convert::Infallible;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        _qos: QoS,
        _retain: bool,
    ) -> Result<(), Self::Error> {
        self.messages.push((topic.into(), payload.into()));
        Ok(())
    }
}

fn three_windows() -> WindowScheduler {
    WindowScheduler::from_windows([
        WindowSpec::new(5, 0, "t1").expect("valid window"),
        WindowSpec::new(10, 0, "t2").expect("valid window"),
        WindowSpec::new(14, 0, "t3").expect("valid window"),
    ])
    .expect("schedule fits")
}

fn config() -> SamplerConfig {
    SamplerConfig {
        calibration: Calibration::new(2300, 1795).expect("non-zero span"),
        ..SamplerConfig::default()
    }
}

#[test]
fn daily_schedule_publishes_each_window_once() {
    let tracker: ReadinessTracker<NoopRawMutex> = ReadinessTracker::new();
    tracker.set(ReadinessFlag::Link);
    tracker.set(ReadinessFlag::Session);

    let mut sampler = Sampler::new(
        &tracker,
        three_windows(),
        ScriptedClock::default(),
        ScriptedProbe::default(),
        BrokerLog::default(),
        config(),
    );

    sampler.clock_mut().set(2024, 6, 1, 5, 0);
    sampler.source_mut().raw = 500;
    let outcome = block_on(sampler.step());
    let attempt = outcome.publish().copied().expect("05:00 window fires");
    assert_eq!(attempt.index, 0);
    assert!(attempt.value.value() <= 100.0);

    sampler.clock_mut().set(2024, 6, 1, 10, 0);
    sampler.source_mut().raw = 4095;
    block_on(sampler.step());

    sampler.clock_mut().set(2024, 6, 1, 5, 0);
    let repeat = block_on(sampler.step());
    assert_eq!(repeat.publish(), None, "same window must not fire twice a day");

    let published: Vec<(&str, &str)> = sampler
        .publisher()
        .messages
        .iter()
        .map(|(topic, payload)| (topic.as_str(), payload.as_str()))
        .collect();
    assert_eq!(published, [("t1", "100.00%"), ("t2", "0.00%")]);

    assert_eq!(sampler.schedule().state(2), Some(WindowState::Armed));

    sampler.clock_mut().set(2024, 6, 2, 0, 0);
    let rollover = block_on(sampler.step());
    match rollover {
        TickOutcome::Evaluated { report, publish } => {
            assert!(report.rolled_over.is_some(), "midnight re-arms the table");
            assert_eq!(publish, None);
        }
        TickOutcome::ClockInvalid => panic!("clock is synchronized"),
    }
    assert!(
        sampler
            .schedule()
            .statuses()
            .all(|status| status.state == WindowState::Armed)
    );

    sampler.clock_mut().set(2024, 6, 2, 5, 0);
    assert!(block_on(sampler.step()).publish().is_some());
    assert_eq!(sampler.publisher().messages.len(), 3);
}

#[test]
fn missed_midnight_still_rearms_on_next_valid_sample() {
    let tracker: ReadinessTracker<NoopRawMutex> = ReadinessTracker::new();
    tracker.set(ReadinessFlag::Link);
    tracker.set(ReadinessFlag::Session);

    let mut sampler = Sampler::new(
        &tracker,
        three_windows(),
        ScriptedClock::default(),
        ScriptedProbe { raw: 3000 },
        BrokerLog::default(),
        config(),
    );

    sampler.clock_mut().set(2024, 6, 1, 14, 0);
    assert!(block_on(sampler.step()).publish().is_some());

    // Offline across midnight; first sample of the new day is mid-morning.
    sampler.clock_mut().set(2024, 6, 2, 9, 42);
    let outcome = block_on(sampler.step());
    assert_eq!(outcome.publish(), None);
    assert_eq!(sampler.schedule().state(2), Some(WindowState::Armed));

    sampler.clock_mut().set(2024, 6, 2, 14, 0);
    assert!(block_on(sampler.step()).publish().is_some());
}

#[test]
fn unsynchronized_clock_never_fires() {
    let tracker: ReadinessTracker<NoopRawMutex> = ReadinessTracker::new();
    tracker.set(ReadinessFlag::Link);
    tracker.set(ReadinessFlag::Session);

    let mut sampler = Sampler::new(
        &tracker,
        three_windows(),
        ScriptedClock::default(),
        ScriptedProbe::default(),
        BrokerLog::default(),
        config(),
    );

    assert_eq!(block_on(sampler.step()), TickOutcome::ClockInvalid);

    sampler.clock_mut().set(1970, 1, 1, 5, 0);
    assert_eq!(block_on(sampler.step()), TickOutcome::ClockInvalid);
    assert!(sampler.publisher().messages.is_empty());
}
