//! The long-running sampling loop.
//!
//! One iteration waits for link and session readiness, reads the wall clock,
//! advances the [`WindowScheduler`], and when a window comes due samples the
//! probe, calibrates the reading, and publishes it to the window's topic.
//! Publish failures leave the window Fired: a missed report is preferred over
//! a burst of duplicates for the same window.

use core::fmt;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Timer};

use crate::calibration::{Calibration, Percent, RawSample, format_payload};
use crate::clock::{ClockSource, LocalTime};
use crate::readiness::ReadinessTracker;
use crate::schedule::{
    FireDecision, MAX_WINDOWS, PublishOutcome, TickReport, WindowIndex, WindowScheduler,
};

/// Poll cadence between iterations; bounds window detection granularity.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff applied while the wall clock is not yet synchronized.
pub const DEFAULT_INVALID_TIME_BACKOFF: Duration = Duration::from_secs(5);

/// MQTT delivery guarantee requested from the publisher.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Produces one raw sample from the configured converter channel.
pub trait SampleSource {
    fn read_raw(&mut self) -> RawSample;
}

impl<T: SampleSource + ?Sized> SampleSource for &mut T {
    fn read_raw(&mut self) -> RawSample {
        (**self).read_raw()
    }
}

/// Delivers a payload over an already established publish session.
pub trait Publisher {
    /// Transport-specific failure.
    type Error: fmt::Debug;

    /// Publishes `payload` on `topic`; not retried by the caller.
    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Tunables for the sampling loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplerConfig {
    pub calibration: Calibration,
    pub poll_interval: Duration,
    pub invalid_time_backoff: Duration,
    pub qos: QoS,
    pub retain: bool,
}

impl SamplerConfig {
    /// Sleep applied after an iteration that produced `outcome`.
    #[must_use]
    pub fn delay_after(&self, outcome: &TickOutcome) -> Duration {
        match outcome {
            TickOutcome::ClockInvalid => self.invalid_time_backoff,
            TickOutcome::Evaluated { .. } => self.poll_interval,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            invalid_time_backoff: DEFAULT_INVALID_TIME_BACKOFF,
            qos: QoS::default(),
            retain: false,
        }
    }
}

/// Sample-and-publish attempt made for a fired window.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PublishAttempt {
    pub index: WindowIndex,
    pub raw: RawSample,
    pub value: Percent,
    pub delivered: bool,
}

/// Result of one loop iteration after readiness was satisfied.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The clock has not synchronized yet; nothing was evaluated.
    ClockInvalid,
    /// The scheduler evaluated a valid sample.
    Evaluated {
        report: TickReport,
        publish: Option<PublishAttempt>,
    },
}

impl TickOutcome {
    /// Publish attempt made during this iteration, if any.
    #[must_use]
    pub const fn publish(&self) -> Option<&PublishAttempt> {
        match self {
            TickOutcome::Evaluated {
                publish: Some(attempt),
                ..
            } => Some(attempt),
            _ => None,
        }
    }
}

/// Orchestrates readiness, clock, scheduler, sampling, and publishing.
pub struct Sampler<'a, M, C, S, P, const WINDOWS: usize = MAX_WINDOWS>
where
    M: RawMutex,
{
    readiness: &'a ReadinessTracker<M>,
    schedule: WindowScheduler<WINDOWS>,
    clock: C,
    source: S,
    publisher: P,
    config: SamplerConfig,
}

impl<'a, M, C, S, P, const WINDOWS: usize> Sampler<'a, M, C, S, P, WINDOWS>
where
    M: RawMutex,
    C: ClockSource,
    S: SampleSource,
    P: Publisher,
{
    /// Wires the loop to its collaborators.
    pub fn new(
        readiness: &'a ReadinessTracker<M>,
        schedule: WindowScheduler<WINDOWS>,
        clock: C,
        source: S,
        publisher: P,
        config: SamplerConfig,
    ) -> Self {
        Self {
            readiness,
            schedule,
            clock,
            source,
            publisher,
            config,
        }
    }

    pub fn schedule(&self) -> &WindowScheduler<WINDOWS> {
        &self.schedule
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    /// Runs forever, handing each iteration's outcome to `observe`.
    pub async fn run<F>(&mut self, mut observe: F) -> !
    where
        F: FnMut(&TickOutcome),
    {
        loop {
            let outcome = self.step().await;
            observe(&outcome);
            Timer::after(self.config.delay_after(&outcome)).await;
        }
    }

    /// One iteration without the trailing sleep: blocks on readiness, then
    /// evaluates the current time.
    pub async fn step(&mut self) -> TickOutcome {
        self.readiness.wait_all_ready().await;
        self.evaluate().await
    }

    /// Evaluates the clock and scheduler assuming readiness already holds.
    pub async fn evaluate(&mut self) -> TickOutcome {
        let Some(now) = self.clock.local_time().filter(LocalTime::is_plausible) else {
            return TickOutcome::ClockInvalid;
        };

        let report = self.schedule.tick(&now);
        let publish = match report.fire {
            Some(decision) => self.fire(decision).await,
            None => None,
        };
        TickOutcome::Evaluated { report, publish }
    }

    async fn fire(&mut self, decision: FireDecision) -> Option<PublishAttempt> {
        let window = self.schedule.window(decision.index)?;

        let raw = self.source.read_raw();
        let value = self.config.calibration.calibrate(raw);
        let payload = format_payload(value);

        let delivered = self
            .publisher
            .publish(
                window.topic.as_str(),
                payload.as_str(),
                self.config.qos,
                self.config.retain,
            )
            .await
            .is_ok();

        let outcome = if delivered {
            PublishOutcome::Delivered(value)
        } else {
            PublishOutcome::Failed(value)
        };
        self.schedule.record_outcome(decision.index, outcome);

        Some(PublishAttempt {
            index: decision.index,
            raw,
            value,
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::ReadinessFlag;
    use crate::schedule::{WindowSpec, WindowState};
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use heapless::{String, Vec};

    struct FixedClock(Option<LocalTime>);

    impl ClockSource for FixedClock {
        fn local_time(&mut self) -> Option<LocalTime> {
            self.0
        }
    }

    struct FixedSample(RawSample);

    impl SampleSource for FixedSample {
        fn read_raw(&mut self) -> RawSample {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Vec<(String<16>, String<16>, u8), 4>,
        fail: bool,
    }

    impl Publisher for RecordingPublisher {
        type Error = ();

        async fn publish(
            &mut self,
            topic: &str,
            payload: &str,
            qos: QoS,
            _retain: bool,
        ) -> Result<(), Self::Error> {
            let entry = (
                String::try_from(topic).map_err(|_| ())?,
                String::try_from(payload).map_err(|_| ())?,
                qos.as_u8(),
            );
            self.sent.push(entry).map_err(|_| ())?;
            if self.fail { Err(()) } else { Ok(()) }
        }
    }

    fn schedule() -> WindowScheduler {
        WindowScheduler::from_windows([WindowSpec::new(5, 0, "t1").unwrap()]).unwrap()
    }

    fn ready_tracker() -> ReadinessTracker<NoopRawMutex> {
        let tracker = ReadinessTracker::new();
        tracker.set(ReadinessFlag::Link);
        tracker.set(ReadinessFlag::Session);
        tracker
    }

    #[test]
    fn unsynchronized_clock_backs_off() {
        let tracker = ready_tracker();
        let epoch = LocalTime::new(1970, 1, 1, 5, 0, 0);
        let mut sampler = Sampler::new(
            &tracker,
            schedule(),
            FixedClock(epoch),
            FixedSample(500),
            RecordingPublisher::default(),
            SamplerConfig::default(),
        );

        let outcome = block_on(sampler.step());
        assert_eq!(outcome, TickOutcome::ClockInvalid);
        assert_eq!(
            sampler.config().delay_after(&outcome),
            DEFAULT_INVALID_TIME_BACKOFF
        );
        assert!(sampler.publisher().sent.is_empty());
        assert_eq!(sampler.schedule().last_reset_day(), None);
    }

    #[test]
    fn due_window_publishes_calibrated_payload() {
        let tracker = ready_tracker();
        let mut sampler = Sampler::new(
            &tracker,
            schedule(),
            FixedClock(LocalTime::new(2024, 6, 1, 5, 0, 17)),
            FixedSample(500),
            RecordingPublisher::default(),
            SamplerConfig::default(),
        );

        let outcome = block_on(sampler.step());
        let attempt = outcome.publish().copied().expect("window fired");
        assert!(attempt.delivered);
        assert_eq!(attempt.value, Percent::MAX);

        let (topic, payload, qos) = &sampler.publisher().sent[0];
        assert_eq!(topic.as_str(), "t1");
        assert_eq!(payload.as_str(), "100.00%");
        assert_eq!(*qos, 1);
        assert_eq!(sampler.config().delay_after(&outcome), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn failed_publish_keeps_window_fired() {
        let tracker = ready_tracker();
        let publisher = RecordingPublisher {
            fail: true,
            ..RecordingPublisher::default()
        };
        let mut sampler = Sampler::new(
            &tracker,
            schedule(),
            FixedClock(LocalTime::new(2024, 6, 1, 5, 0, 0)),
            FixedSample(4095),
            publisher,
            SamplerConfig::default(),
        );

        let first = block_on(sampler.step());
        assert_eq!(first.publish().map(|attempt| attempt.delivered), Some(false));
        assert_eq!(sampler.schedule().state(0), Some(WindowState::Fired));

        let second = block_on(sampler.step());
        assert_eq!(second.publish(), None);
        assert_eq!(sampler.publisher().sent.len(), 1);
    }
}
