use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use sampler_core::calibration::{Calibration, RawSample};
use sampler_core::clock::{ClockSource, LocalTime};
use sampler_core::protocol::ModemEvent;
use sampler_core::readiness::{ReadinessFlag, ReadinessTracker};
use sampler_core::sampler::{Publisher, QoS, SampleSource, Sampler, SamplerConfig, TickOutcome};
use sampler_core::schedule::{PublishOutcome, WindowScheduler, WindowSpec, WindowState};
use sampler_core::telemetry::TelemetryRecorder;

/// Topic used when no `--window` flag is given.
pub const DEFAULT_TOPIC: &str = "garden/soil-moisture/s-1";

/// Windows used when no `--window` flag is given.
pub const DEFAULT_WINDOWS: [(u8, u8); 3] = [(5, 0), (10, 0), (14, 0)];

/// Upper bound for a single `run` command (one simulated week).
const MAX_RUN_MINUTES: u32 = 7 * 24 * 60;

/// Readiness flags shared between the REPL and the sampler.
pub type HostReadiness = ReadinessTracker<NoopRawMutex>;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("link", "link up|down                    - toggle the network link flag"),
    ("session", "session up|down                 - toggle the broker session flag"),
    ("urc", "urc <line>                      - feed one raw modem line"),
    (
        "clock",
        "clock set <YYYY-MM-DD> <HH:MM[:SS]> | clock unsync | clock advance <seconds>",
    ),
    ("adc", "adc <raw>                       - set the next probe reading"),
    ("broker", "broker accept|reject            - choose the publish result"),
    ("tick", "tick                            - run one sampler iteration"),
    ("run", "run <minutes>                   - tick once per simulated minute"),
    ("status", "status                          - show flags, clock and windows"),
    ("telemetry", "telemetry                       - dump the telemetry ring"),
    ("help", "help [topic]                    - show help for a command"),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Daily,
    Offline,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Daily => "transcripts/emulator-daily.log",
            TranscriptProfile::Offline => "transcripts/emulator-offline.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Daily => "Soil sampler emulator daily schedule transcript",
            TranscriptProfile::Offline => "Soil sampler emulator offline/recovery transcript",
        }
    }
}

/// Everything a session is configured with up front.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub schedule: WindowScheduler,
    pub calibration: Calibration,
    pub transcript: Option<(PathBuf, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut schedule = WindowScheduler::new();
        for (hour, minute) in DEFAULT_WINDOWS {
            if let Ok(spec) = WindowSpec::new(hour, minute, DEFAULT_TOPIC) {
                let _ = schedule.push(spec);
            }
        }
        Self {
            schedule,
            calibration: Calibration::default(),
            transcript: None,
        }
    }
}

impl SessionConfig {
    /// Parses `--window HH:MM=topic` (repeatable), `--zero <n>`, `--span <n>`
    /// and `--transcript <path>`.
    pub fn from_args<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut windows: Option<WindowScheduler> = None;
        let mut zero_point = config.calibration.zero_point();
        let mut span = config.calibration.span();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            let mut value = |name: &str| {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| format!("Expected value after {name}"))
            };

            match flag.as_str() {
                "--window" => {
                    let spec = parse_window(&value("--window")?)?;
                    windows
                        .get_or_insert_with(WindowScheduler::new)
                        .push(spec)
                        .map_err(|err| format!("Invalid window: {err}"))?;
                }
                "--zero" => zero_point = parse_number(&value("--zero")?, "--zero")?,
                "--span" => span = parse_number(&value("--span")?, "--span")?,
                "--transcript" => {
                    let path = PathBuf::from(value("--transcript")?);
                    config.transcript =
                        Some((path, "Soil sampler emulator transcript".to_string()));
                }
                other => return Err(format!("Unknown argument `{other}`")),
            }
        }

        if let Some(schedule) = windows {
            config.schedule = schedule;
        }
        config.calibration = Calibration::new(zero_point, span)
            .map_err(|err| format!("Invalid calibration: {err}"))?;
        Ok(config)
    }
}

fn parse_number(text: &str, flag: &str) -> Result<i32, String> {
    text.parse()
        .map_err(|_| format!("Expected an integer after {flag}, got `{text}`"))
}

fn parse_window(text: &str) -> Result<WindowSpec, String> {
    let (time, topic) = text
        .split_once('=')
        .ok_or_else(|| format!("Expected HH:MM=topic, got `{text}`"))?;
    let (hour, minute) =
        parse_hour_minute(time).ok_or_else(|| format!("Invalid time of day `{time}`"))?;
    WindowSpec::new(hour, minute, topic).map_err(|err| format!("Invalid window: {err}"))
}

fn parse_hour_minute(text: &str) -> Option<(u8, u8)> {
    let (hour, minute) = text.split_once(':')?;
    Some((hour.parse().ok()?, minute.parse().ok()?))
}

fn parse_local_time(date: &str, time: &str) -> Option<LocalTime> {
    let mut date_fields = date.splitn(3, '-');
    let year = date_fields.next()?.parse().ok()?;
    let month = date_fields.next()?.parse().ok()?;
    let day = date_fields.next()?.parse().ok()?;

    let mut time_fields = time.splitn(3, ':');
    let hour = time_fields.next()?.parse().ok()?;
    let minute = time_fields.next()?.parse().ok()?;
    let second = match time_fields.next() {
        Some(second) => second.parse().ok()?,
        None => 0,
    };
    LocalTime::new(year, month, day, hour, minute, second)
}

/// Simulated SNTP-backed wall clock.
#[derive(Debug, Default)]
pub struct SimClock {
    now: Option<LocalTime>,
}

impl ClockSource for SimClock {
    fn local_time(&mut self) -> Option<LocalTime> {
        self.now
    }
}

/// Simulated probe returning whatever the operator last set.
#[derive(Debug)]
pub struct SimProbe {
    raw: RawSample,
}

impl SampleSource for SimProbe {
    fn read_raw(&mut self) -> RawSample {
        self.raw
    }
}

/// Error returned by [`SimBroker`] while it is set to reject.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BrokerRejected;

impl fmt::Display for BrokerRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("broker rejected publish")
    }
}

/// Message captured by [`SimBroker`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
    pub delivered: bool,
}

/// Simulated broker that records every publish attempt.
#[derive(Debug, Default)]
pub struct SimBroker {
    reject: bool,
    messages: Vec<BrokerMessage>,
}

impl SimBroker {
    pub fn messages(&self) -> &[BrokerMessage] {
        &self.messages
    }
}

impl Publisher for SimBroker {
    type Error = BrokerRejected;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.messages.push(BrokerMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
            delivered: !self.reject,
        });
        if self.reject {
            Err(BrokerRejected)
        } else {
            Ok(())
        }
    }
}

type HostSampler<'a> = Sampler<'a, NoopRawMutex, SimClock, SimProbe, SimBroker>;

pub struct Session<'a> {
    readiness: &'a HostReadiness,
    sampler: HostSampler<'a>,
    telemetry: TelemetryRecorder<Duration>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl<'a> Session<'a> {
    pub fn new(readiness: &'a HostReadiness, config: SessionConfig) -> io::Result<Self> {
        let transcript = match &config.transcript {
            Some((path, header)) => Some(TranscriptLogger::create(path, header)?),
            None => None,
        };
        let sampler_config = SamplerConfig {
            calibration: config.calibration,
            ..SamplerConfig::default()
        };
        let sampler = Sampler::new(
            readiness,
            config.schedule,
            SimClock::default(),
            SimProbe {
                raw: config.calibration.zero_point(),
            },
            SimBroker::default(),
            sampler_config,
        );

        Ok(Self {
            readiness,
            sampler,
            telemetry: TelemetryRecorder::new(),
            transcript,
            started_at: HostInstant::now(),
        })
    }

    /// Opens a session that records into `profile`'s transcript file.
    pub fn with_profile(
        readiness: &'a HostReadiness,
        profile: TranscriptProfile,
    ) -> io::Result<Self> {
        let config = SessionConfig {
            transcript: Some((PathBuf::from(profile.log_path()), profile.header().to_string())),
            ..SessionConfig::default()
        };
        Self::new(readiness, config)
    }

    pub fn broker(&self) -> &SimBroker {
        self.sampler.publisher()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = self.dispatch(trimmed, elapsed);
        if let Some(transcript) = self.transcript.as_mut() {
            for line in &lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(lines)
    }

    fn dispatch(&mut self, line: &str, elapsed: Duration) -> Vec<String> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        match (command.as_str(), args.as_slice()) {
            ("help", []) => help_lines(None),
            ("help", [topic]) => help_lines(Some(*topic)),
            ("link", [state]) => self.handle_flag(ReadinessFlag::Link, state, elapsed),
            ("session", [state]) => self.handle_flag(ReadinessFlag::Session, state, elapsed),
            ("urc", _) => {
                let raw = line
                    .split_once(char::is_whitespace)
                    .map_or("", |(_, rest)| rest.trim());
                self.handle_urc(raw, elapsed)
            }
            ("clock", ["set", date, time]) => match parse_local_time(date, time) {
                Some(now) => {
                    self.sampler.clock_mut().now = Some(now);
                    vec![format!("OK clock {now}")]
                }
                None => vec![format!("ERR clock invalid time `{date} {time}`")],
            },
            ("clock", ["unsync"]) => {
                self.sampler.clock_mut().now = None;
                vec!["OK clock unsynchronized".to_string()]
            }
            ("clock", ["advance", seconds]) => match seconds.parse::<u64>() {
                Ok(seconds) => self.advance_clock(seconds),
                Err(_) => vec![format!("ERR clock expected seconds, got `{seconds}`")],
            },
            ("adc", [raw]) => match raw.parse::<RawSample>() {
                Ok(raw) => {
                    self.sampler.source_mut().raw = raw;
                    let value = self.sampler.config().calibration.calibrate(raw);
                    vec![format!("OK adc raw={raw} calibrated={value}")]
                }
                Err(_) => vec![format!("ERR adc expected integer, got `{raw}`")],
            },
            ("broker", [mode]) => match mode.to_ascii_lowercase().as_str() {
                "accept" => {
                    self.sampler.publisher_mut().reject = false;
                    vec!["OK broker accepting".to_string()]
                }
                "reject" => {
                    self.sampler.publisher_mut().reject = true;
                    vec!["OK broker rejecting".to_string()]
                }
                _ => vec![format!("ERR broker expected accept|reject, got `{mode}`")],
            },
            ("tick", []) => self.tick(elapsed),
            ("run", [minutes]) => match minutes.parse::<u32>() {
                Ok(minutes) if minutes <= MAX_RUN_MINUTES => self.run_minutes(minutes, elapsed),
                _ => vec![format!(
                    "ERR run expected minutes between 0 and {MAX_RUN_MINUTES}, got `{minutes}`"
                )],
            },
            ("status", []) => self.status_lines(),
            ("telemetry", []) => self.telemetry_lines(),
            _ => vec![format!("ERR syntax unknown command `{line}` (try `help`)")],
        }
    }

    fn handle_flag(&mut self, flag: ReadinessFlag, state: &str, elapsed: Duration) -> Vec<String> {
        let up = match state.to_ascii_lowercase().as_str() {
            "up" => true,
            "down" => false,
            _ => return vec![format!("ERR {flag} expected up|down, got `{state}`")],
        };
        self.apply_readiness(flag, up, elapsed)
    }

    fn apply_readiness(&mut self, flag: ReadinessFlag, up: bool, elapsed: Duration) -> Vec<String> {
        let changed = self.readiness.update(flag, up);
        let flags = self.readiness.flags();
        if changed {
            self.telemetry.record_readiness(flag, up, flags, elapsed);
        }
        let verb = if changed { "OK" } else { "OK unchanged" };
        vec![format!("{verb} {flags} all-ready={}", flags.all_ready())]
    }

    fn handle_urc(&mut self, raw: &str, elapsed: Duration) -> Vec<String> {
        let event = match ModemEvent::parse(raw) {
            Ok(event) => event,
            Err(err) => return vec![format!("ERR urc {err}")],
        };

        if let Some((flag, up)) = event.readiness_update() {
            let mut lines = vec![format!("urc {event:?}")];
            lines.extend(self.apply_readiness(flag, up, elapsed));
            return lines;
        }

        match event {
            ModemEvent::SntpTime(time) if time.is_plausible() => {
                self.sampler.clock_mut().now = Some(time);
                vec![format!("OK clock {time} (sntp)")]
            }
            ModemEvent::SntpTime(time) => {
                vec![format!("OK sntp not synchronized yet (year {})", time.year())]
            }
            ModemEvent::Unrecognized(text) => vec![format!("OK urc ignored `{text}`")],
            other => vec![format!("OK urc {other:?}")],
        }
    }

    fn advance_clock(&mut self, seconds: u64) -> Vec<String> {
        let clock = self.sampler.clock_mut();
        match clock.now.and_then(|now| now.advanced_by(seconds)) {
            Some(now) => {
                clock.now = Some(now);
                vec![format!("OK clock {now}")]
            }
            None => vec!["ERR clock not set".to_string()],
        }
    }

    fn tick(&mut self, elapsed: Duration) -> Vec<String> {
        match self.evaluate(elapsed) {
            Some(outcome) => self.describe(&outcome),
            None => vec![self.not_ready_line()],
        }
    }

    /// One sampler iteration; `None` while the sampler would still be parked
    /// on readiness.
    fn evaluate(&mut self, elapsed: Duration) -> Option<TickOutcome> {
        if !self.readiness.is_all_ready() {
            return None;
        }
        let outcome = block_on(self.sampler.evaluate());
        self.telemetry.record_outcome(&outcome, elapsed);
        Some(outcome)
    }

    fn not_ready_line(&self) -> String {
        format!(
            "WAIT not ready ({}); sampler blocks until both flags are up",
            self.readiness.flags()
        )
    }

    fn run_minutes(&mut self, minutes: u32, elapsed: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        let mut attempts = 0usize;
        for _ in 0..minutes {
            let Some(outcome) = self.evaluate(elapsed) else {
                lines.push(self.not_ready_line());
                break;
            };
            match &outcome {
                TickOutcome::ClockInvalid => {
                    lines.extend(self.describe(&outcome));
                    break;
                }
                TickOutcome::Evaluated { report, publish } => {
                    if publish.is_some() {
                        attempts += 1;
                    }
                    if publish.is_some() || report.rolled_over.is_some() {
                        lines.extend(self.describe(&outcome));
                    }
                }
            }

            let clock = self.sampler.clock_mut();
            clock.now = clock.now.and_then(|now| now.advanced_by(60));
        }
        lines.push(format!(
            "OK ran {minutes} minute(s), {attempts} publish attempt(s)"
        ));
        lines
    }

    fn describe(&self, outcome: &TickOutcome) -> Vec<String> {
        let (report, publish) = match outcome {
            TickOutcome::ClockInvalid => {
                return vec![format!(
                    "WAIT clock not synchronized; backing off {}s",
                    self.sampler.config().invalid_time_backoff.as_secs()
                )];
            }
            TickOutcome::Evaluated { report, publish } => (report, publish),
        };

        let mut lines = Vec::new();
        if let Some(date) = report.rolled_over {
            lines.push(format!("day rollover {date}: all windows re-armed"));
        }
        match (report.fire, publish) {
            (Some(decision), Some(attempt)) => {
                let topic = self
                    .sampler
                    .schedule()
                    .window(decision.index)
                    .map_or("?", |window| window.topic.as_str());
                let status = if attempt.delivered {
                    "PUBLISH"
                } else {
                    "FAILED"
                };
                lines.push(format!(
                    "{status} window={} at={} topic={topic} payload=\"{}\" raw={}",
                    decision.index, decision.at, attempt.value, attempt.raw
                ));
                if !attempt.delivered {
                    lines.push("window stays fired until the next day".to_string());
                }
            }
            _ => match self.sampler.clock().now {
                Some(now) => lines.push(format!("OK no window due at {}", now.time_of_day())),
                None => lines.push("OK no window due".to_string()),
            },
        }
        lines
    }

    fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("readiness {}", self.readiness.flags()),
            match self.sampler.clock().now {
                Some(now) if now.is_plausible() => format!("clock {now}"),
                Some(now) => format!("clock {now} (not synchronized)"),
                None => "clock unsynchronized".to_string(),
            },
            format!(
                "probe raw={} broker={}",
                self.sampler.source().raw,
                if self.broker().reject {
                    "rejecting"
                } else {
                    "accepting"
                }
            ),
        ];
        for status in self.sampler.schedule().statuses() {
            let state = match status.state {
                WindowState::Armed => "armed",
                WindowState::Fired => "fired",
            };
            let last = match status.last_outcome {
                Some(PublishOutcome::Delivered(value)) => format!(" last=delivered {value}"),
                Some(PublishOutcome::Failed(value)) => format!(" last=failed {value}"),
                None => String::new(),
            };
            lines.push(format!(
                "window {} {} {} {state}{last}",
                status.index, status.spec.at, status.spec.topic
            ));
        }
        lines
    }

    fn telemetry_lines(&self) -> Vec<String> {
        if self.telemetry.is_empty() {
            return vec!["telemetry empty".to_string()];
        }
        self.telemetry
            .oldest_first()
            .map(|record| {
                format!(
                    "#{} +{}ms {}",
                    record.id,
                    record.timestamp.as_millis(),
                    record.event
                )
            })
            .collect()
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn create(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(self.writer, "# Timestamps are milliseconds since session start")?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(session: &mut Session<'_>, commands: &[&str]) -> Vec<String> {
        let mut lines = Vec::new();
        for command in commands {
            lines.extend(session.handle_command(command).expect("no transcript io"));
        }
        lines
    }

    fn two_windows() -> SessionConfig {
        SessionConfig::from_args(
            ["--window", "05:00=t1", "--window=10:00=t2"]
                .into_iter()
                .map(String::from),
        )
        .expect("valid args")
    }

    #[test]
    fn daily_windows_publish_once_and_rearm_next_day() {
        let readiness = HostReadiness::new();
        let mut session = Session::new(&readiness, two_windows()).expect("session");

        run(
            &mut session,
            &["link up", "session up", "adc 500", "clock set 2024-06-01 05:00:00"],
        );
        let fired = run(&mut session, &["tick"]);
        assert!(fired[0].starts_with("PUBLISH window=0"), "{fired:?}");
        assert!(fired[0].contains("payload=\"100.00%\""));

        let repeat = run(&mut session, &["clock advance 30", "tick"]);
        assert!(repeat.iter().any(|line| line.starts_with("OK no window due")));

        run(&mut session, &["adc 4095", "clock set 2024-06-01 10:00:00"]);
        let second = run(&mut session, &["tick"]);
        assert!(second[0].contains("topic=t2 payload=\"0.00%\""), "{second:?}");

        run(&mut session, &["adc 500", "clock set 2024-06-02 05:00:10"]);
        let next_day = run(&mut session, &["tick"]);
        assert_eq!(next_day[0], "day rollover 2024-06-02: all windows re-armed");
        assert!(next_day[1].starts_with("PUBLISH window=0"));

        let broker = session.broker().messages();
        assert_eq!(broker.len(), 3);
        assert_eq!(broker[1].topic, "t2");
        assert_eq!(broker[1].payload, "0.00%");
        assert_eq!(broker[0].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn tick_waits_until_both_flags_are_up() {
        let readiness = HostReadiness::new();
        let mut session = Session::new(&readiness, two_windows()).expect("session");

        let lines = run(
            &mut session,
            &["clock set 2024-06-01 05:00", "link up", "tick"],
        );
        assert!(lines.last().is_some_and(|line| line.starts_with("WAIT not ready")));
        assert!(session.broker().messages().is_empty());

        let lines = run(&mut session, &["session up", "tick"]);
        assert!(lines.last().is_some_and(|line| line.starts_with("PUBLISH")));
    }

    #[test]
    fn modem_reports_drive_flags_and_clock() {
        let readiness = HostReadiness::new();
        let mut session = Session::new(&readiness, two_windows()).expect("session");

        run(
            &mut session,
            &[
                "urc WIFI GOT IP",
                "urc +MQTTCONNECTED:0,1,\"broker.local\",\"1883\",\"\",1",
            ],
        );
        assert!(readiness.is_all_ready());

        let epoch = run(&mut session, &["urc +CIPSNTPTIME:Thu Jan 01 00:00:03 1970", "tick"]);
        assert!(epoch[0].starts_with("OK sntp not synchronized"));
        assert!(epoch[1].starts_with("WAIT clock not synchronized"));

        let synced = run(
            &mut session,
            &["urc +CIPSNTPTIME:Sat Jun 01 05:00:02 2024", "tick"],
        );
        assert!(synced[0].starts_with("OK clock 2024-06-01"), "{synced:?}");
        assert!(synced[1].starts_with("PUBLISH window=0"));

        run(&mut session, &["urc +MQTTDISCONNECTED:0"]);
        assert!(!readiness.is_all_ready());
    }

    #[test]
    fn rejected_publish_is_not_retried() {
        let readiness = HostReadiness::new();
        let mut session = Session::new(&readiness, two_windows()).expect("session");

        let lines = run(
            &mut session,
            &[
                "link up",
                "session up",
                "broker reject",
                "clock set 2024-06-01 04:59",
                "run 3",
            ],
        );
        assert!(lines.iter().any(|line| line.starts_with("FAILED window=0")));
        assert!(lines.last().is_some_and(|line| line.contains("1 publish attempt(s)")));
        assert_eq!(session.broker().messages().len(), 1);
        assert!(!session.broker().messages()[0].delivered);
    }

    #[test]
    fn args_reject_zero_span_and_bad_windows() {
        let parse =
            |args: &[&str]| SessionConfig::from_args(args.iter().map(|arg| (*arg).to_string()));

        assert!(parse(&["--span", "0"]).is_err());
        assert!(parse(&["--window", "25:00=t1"]).is_err());
        assert!(parse(&["--window", "05:00=t1", "--window", "05:00=t2"]).is_err());
        assert!(parse(&["--bogus"]).is_err());

        let config = parse(&["--zero=1000", "--span", "2000"]).expect("valid");
        assert_eq!(config.calibration.zero_point(), 1000);
        assert_eq!(config.calibration.span(), 2000);
        assert_eq!(config.schedule.len(), DEFAULT_WINDOWS.len());
    }
}
