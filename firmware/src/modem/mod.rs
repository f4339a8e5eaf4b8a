//! Channels between the sampler and the ESP-AT modem task.
//!
//! The sampler never touches the UART. It hands a [`PublishRequest`] to the
//! modem task through a bounded channel and waits on a signal for the
//! co-processor's final result. Results carry the request's sequence number
//! so a late answer to a request that already timed out is discarded.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_timeout};
use sampler_core::calibration::Payload;
use sampler_core::clock::LocalTime;
use sampler_core::protocol::{FormatError, ModemEvent};
use sampler_core::readiness::{ReadinessFlag, ReadinessTracker};
use sampler_core::sampler::{Publisher, QoS};
use sampler_core::schedule::Topic;

use crate::clock;
use crate::telemetry;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
pub type ModemMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type ModemMutex = NoopRawMutex;

/// Depth of the publish request queue; the sampler has one request in flight.
pub const PUBLISH_QUEUE_DEPTH: usize = 1;

/// Upper bound on a publish round trip, including queueing behind SNTP polls.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

/// Why a command or publish did not complete.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModemError {
    /// Topic or payload did not fit the local buffers.
    TooLong,
    /// The command could not be rendered.
    Format(FormatError),
    /// The co-processor answered `ERROR`.
    Rejected,
    /// No final result arrived in time.
    Timeout,
    /// The UART write failed.
    Transport,
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemError::TooLong => f.write_str("topic or payload too long"),
            ModemError::Format(err) => write!(f, "format: {err}"),
            ModemError::Rejected => f.write_str("rejected by modem"),
            ModemError::Timeout => f.write_str("timed out"),
            ModemError::Transport => f.write_str("UART write failed"),
        }
    }
}

impl From<FormatError> for ModemError {
    fn from(err: FormatError) -> Self {
        ModemError::Format(err)
    }
}

/// Depth of the final-result queue between the UART reader and writer.
pub const RESPONSE_QUEUE_DEPTH: usize = 2;

/// Tags a publish request and the result that answers it.
pub type RequestSeq = u32;

/// Publish handed from the sampler to the modem task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishRequest {
    pub seq: RequestSeq,
    pub topic: Topic,
    pub payload: Payload,
    pub qos: QoS,
    pub retain: bool,
}

pub type PublishChannel = Channel<ModemMutex, PublishRequest, PUBLISH_QUEUE_DEPTH>;
pub type PublishSender<'a> = Sender<'a, ModemMutex, PublishRequest, PUBLISH_QUEUE_DEPTH>;
pub type PublishReceiver<'a> = Receiver<'a, ModemMutex, PublishRequest, PUBLISH_QUEUE_DEPTH>;

/// Result slot for the request currently in flight.
pub type PublishResult = Signal<ModemMutex, (RequestSeq, Result<(), ModemError>)>;

/// Final results (`OK` == true) handed from the UART reader to the writer.
pub type Responses = Channel<ModemMutex, bool, RESPONSE_QUEUE_DEPTH>;

/// Bundles the request queue and result slot so tasks share one instance.
pub struct ModemLink {
    requests: PublishChannel,
    results: PublishResult,
}

impl ModemLink {
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            results: Signal::new(),
        }
    }

    /// Receiver drained by the modem task.
    pub fn requests(&self) -> PublishReceiver<'_> {
        self.requests.receiver()
    }

    /// Completes request `seq`.
    pub fn complete(&self, seq: RequestSeq, result: Result<(), ModemError>) {
        self.results.signal((seq, result));
    }

    /// Publisher handle handed to the sampler.
    pub fn publisher(&self) -> ModemPublisher<'_> {
        ModemPublisher {
            requests: self.requests.sender(),
            results: &self.results,
            timeout: PUBLISH_TIMEOUT,
            next_seq: 0,
        }
    }
}

/// [`Publisher`] that forwards to the modem task.
pub struct ModemPublisher<'a> {
    requests: PublishSender<'a>,
    results: &'a PublishResult,
    timeout: Duration,
    next_seq: RequestSeq,
}

impl ModemPublisher<'_> {
    /// Replaces the round-trip bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Publisher for ModemPublisher<'_> {
    type Error = ModemError;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let request = PublishRequest {
            seq,
            topic: Topic::try_from(topic).map_err(|_| ModemError::TooLong)?,
            payload: Payload::try_from(payload).map_err(|_| ModemError::TooLong)?,
            qos,
            retain,
        };

        with_timeout(self.timeout, async {
            self.requests.send(request).await;
            loop {
                let (done, result) = self.results.wait().await;
                if done == seq {
                    return result;
                }
            }
        })
        .await
        .map_err(|_| ModemError::Timeout)?
    }
}

/// What the UART reader did with one decoded line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineOutcome<'a> {
    /// A readiness flag was reported; `changed` is false for repeats.
    Readiness {
        flag: ReadinessFlag,
        up: bool,
        changed: bool,
    },
    /// A clock report, stored only when `accepted`.
    Clock { time: LocalTime, accepted: bool },
    /// A final result; `forwarded` is false when no command was waiting.
    Response { ok: bool, forwarded: bool },
    /// A line the protocol does not know.
    Ignored(&'a str),
    /// A known line with no effect here.
    Other,
}

/// Applies one modem event to readiness, the wall clock, and the writer's
/// result queue.
pub fn route_event<'a, M: RawMutex>(
    event: ModemEvent<'a>,
    readiness: &ReadinessTracker<M>,
    responses: &Responses,
    now: Instant,
) -> LineOutcome<'a> {
    if let Some((flag, up)) = event.readiness_update() {
        let changed = readiness.update(flag, up);
        if changed {
            telemetry::log_readiness(flag, up, readiness.flags());
        }
        return LineOutcome::Readiness { flag, up, changed };
    }

    match event {
        ModemEvent::SntpTime(time) => {
            let accepted = clock::record_report(&time, now);
            telemetry::log_sntp_report(&time, accepted);
            LineOutcome::Clock { time, accepted }
        }
        ModemEvent::Ok | ModemEvent::Error => {
            let ok = event == ModemEvent::Ok;
            // A full queue means nobody is waiting; the result is stale.
            let forwarded = responses.try_send(ok).is_ok();
            LineOutcome::Response { ok, forwarded }
        }
        ModemEvent::Unrecognized(text) => LineOutcome::Ignored(text),
        _ => LineOutcome::Other,
    }
}
