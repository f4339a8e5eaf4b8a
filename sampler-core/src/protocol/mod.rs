//! ESP-AT line protocol spoken with the Wi-Fi/MQTT/SNTP co-processor.
//!
//! Inbound traffic is CR/LF framed text. [`LineAssembler`] frames raw UART
//! bytes into lines and [`ModemEvent::parse`] turns each line into a typed
//! event using `winnow`. Outbound requests are [`ModemCommand`] values
//! rendered into bounded buffers.

use core::fmt::{self, Write as _};

use heapless::{String, Vec};
use winnow::ascii::{alpha1, digit1, space1};
use winnow::combinator::{alt, cut_err, preceded, terminated};
use winnow::error::ErrMode;
use winnow::prelude::*;
use winnow::token::rest;

use crate::clock::{LocalTime, month_from_abbrev};
use crate::readiness::ReadinessFlag;
use crate::sampler::QoS;

/// Longest inbound line retained by [`LineAssembler`].
pub const MAX_LINE_LEN: usize = 128;

/// Capacity of a rendered command, including the trailing CR/LF.
pub const MAX_COMMAND_LEN: usize = 256;

/// MQTT link used for every session; the firmware only opens one.
pub const MQTT_LINK_ID: u8 = 0;

/// Rendered command buffer.
pub type CommandLine = String<MAX_COMMAND_LEN>;

/// Errors raised while decoding modem output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// A line exceeded [`MAX_LINE_LEN`]; the remainder up to the next newline
    /// is discarded.
    LineTooLong,
    /// A line contained bytes that are not UTF-8.
    InvalidUtf8,
    /// A recognized report had a body that could not be decoded.
    Malformed(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::LineTooLong => write!(f, "line exceeds {MAX_LINE_LEN} bytes"),
            ProtocolError::InvalidUtf8 => f.write_str("line is not valid UTF-8"),
            ProtocolError::Malformed(report) => write!(f, "malformed {report} report"),
        }
    }
}

/// Errors raised while rendering a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FormatError {
    /// The command did not fit in the destination buffer.
    Overflow,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Overflow => f.write_str("command exceeds buffer capacity"),
        }
    }
}

/// Typed view of one line emitted by the co-processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModemEvent<'a> {
    /// Final result of a successful command.
    Ok,
    /// Final result of a failed command.
    Error,
    /// The co-processor is still processing a previous command.
    Busy,
    /// Station associated with an access point (no address yet).
    WifiConnected,
    /// Station obtained an address; the link is usable.
    WifiGotIp,
    /// Station lost its association.
    WifiDisconnected,
    /// MQTT session established on `link_id`.
    MqttConnected { link_id: u8 },
    /// MQTT session dropped on `link_id`.
    MqttDisconnected { link_id: u8 },
    /// Local time report; a 1970 year means SNTP has not synced yet.
    SntpTime(LocalTime),
    /// Unsolicited notice that SNTP adjusted the clock.
    TimeUpdated,
    /// Anything not covered above, with line terminators stripped.
    Unrecognized(&'a str),
}

impl<'a> ModemEvent<'a> {
    /// Decodes a single line. Unknown lines yield [`ModemEvent::Unrecognized`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when a known report prefix carries
    /// an undecodable body.
    pub fn parse(line: &'a str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut input = line;
        match event.parse_next(&mut input) {
            Ok(event) if input.is_empty() => Ok(event),
            Ok(_) | Err(ErrMode::Backtrack(_) | ErrMode::Incomplete(_)) => {
                Ok(ModemEvent::Unrecognized(line))
            }
            Err(ErrMode::Cut(_)) => Err(ProtocolError::Malformed(report_name(line))),
        }
    }

    /// Readiness transition implied by this event, if any.
    #[must_use]
    pub const fn readiness_update(&self) -> Option<(ReadinessFlag, bool)> {
        match self {
            ModemEvent::WifiGotIp => Some((ReadinessFlag::Link, true)),
            ModemEvent::WifiDisconnected => Some((ReadinessFlag::Link, false)),
            ModemEvent::MqttConnected { .. } => Some((ReadinessFlag::Session, true)),
            ModemEvent::MqttDisconnected { .. } => Some((ReadinessFlag::Session, false)),
            _ => None,
        }
    }

    /// Returns `true` for the lines that terminate a command exchange.
    #[must_use]
    pub const fn is_final_result(&self) -> bool {
        matches!(self, ModemEvent::Ok | ModemEvent::Error)
    }
}

const SNTP_TIME_PREFIX: &str = "+CIPSNTPTIME:";
const MQTT_CONNECTED_PREFIX: &str = "+MQTTCONNECTED:";
const MQTT_DISCONNECTED_PREFIX: &str = "+MQTTDISCONNECTED:";

fn report_name(line: &str) -> &'static str {
    if line.starts_with(SNTP_TIME_PREFIX) {
        "SNTP time"
    } else if line.starts_with("+MQTT") {
        "MQTT session"
    } else {
        "modem"
    }
}

fn event<'a>(input: &mut &'a str) -> ModalResult<ModemEvent<'a>> {
    alt((
        "OK".value(ModemEvent::Ok),
        "ERROR".value(ModemEvent::Error),
        preceded("busy", rest).value(ModemEvent::Busy),
        "WIFI CONNECTED".value(ModemEvent::WifiConnected),
        "WIFI GOT IP".value(ModemEvent::WifiGotIp),
        "WIFI DISCONNECT".value(ModemEvent::WifiDisconnected),
        preceded(MQTT_CONNECTED_PREFIX, cut_err(terminated(link_id, rest)))
            .map(|link_id| ModemEvent::MqttConnected { link_id }),
        preceded(MQTT_DISCONNECTED_PREFIX, cut_err(terminated(link_id, rest)))
            .map(|link_id| ModemEvent::MqttDisconnected { link_id }),
        preceded(SNTP_TIME_PREFIX, cut_err(sntp_time)).map(ModemEvent::SntpTime),
        "+TIME_UPDATED".value(ModemEvent::TimeUpdated),
    ))
    .parse_next(input)
}

fn link_id(input: &mut &str) -> ModalResult<u8> {
    number_u8.parse_next(input)
}

// Zero-padded fields (`05:00:00`) are normal in these reports.
fn number_u8(input: &mut &str) -> ModalResult<u8> {
    digit1.parse_to().parse_next(input)
}

fn number_u16(input: &mut &str) -> ModalResult<u16> {
    digit1.parse_to().parse_next(input)
}

// asctime layout: `Tue Oct 19 17:47:56 2021`, single-digit days may be
// space padded.
fn sntp_time(input: &mut &str) -> ModalResult<LocalTime> {
    (
        alpha1,
        space1,
        alpha1.verify_map(month_from_abbrev),
        space1,
        number_u8,
        space1,
        number_u8,
        ':',
        number_u8,
        ':',
        number_u8,
        space1,
        number_u16,
    )
        .verify_map(
            |(_, _, month, _, day, _, hour, _, minute, _, second, _, year)| {
                LocalTime::new(year, month, day, hour, minute, second)
            },
        )
        .parse_next(input)
}

/// Frames UART bytes into CR/LF terminated lines.
pub struct LineAssembler<const N: usize = MAX_LINE_LEN> {
    buffer: Vec<u8, N>,
    complete: bool,
    overflowed: bool,
}

impl<const N: usize> LineAssembler<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            complete: false,
            overflowed: false,
        }
    }

    /// Consumes one byte, returning a non-empty line once its terminator
    /// arrives. The returned slice is valid until the next call.
    ///
    /// # Errors
    ///
    /// Reports [`ProtocolError::LineTooLong`] at the end of an oversized line
    /// and [`ProtocolError::InvalidUtf8`] for lines that fail to decode.
    pub fn push(&mut self, byte: u8) -> Result<Option<&str>, ProtocolError> {
        if self.complete {
            self.buffer.clear();
            self.complete = false;
        }

        match byte {
            b'\r' => Ok(None),
            b'\n' => {
                self.complete = true;
                if core::mem::take(&mut self.overflowed) {
                    return Err(ProtocolError::LineTooLong);
                }
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                core::str::from_utf8(&self.buffer)
                    .map(Some)
                    .map_err(|_| ProtocolError::InvalidUtf8)
            }
            _ => {
                if !self.overflowed && self.buffer.push(byte).is_err() {
                    self.overflowed = true;
                }
                Ok(None)
            }
        }
    }
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests understood by the co-processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModemCommand<'a> {
    /// Liveness probe.
    Attention,
    /// Disable command echo.
    EchoOff,
    /// Station-only Wi-Fi mode.
    StationMode,
    /// Join an access point.
    JoinAccessPoint { ssid: &'a str, password: &'a str },
    /// Enable SNTP with a whole-hour UTC offset.
    ConfigureSntp { utc_offset_hours: i8, server: &'a str },
    /// Ask for the current local time.
    QuerySntpTime,
    /// MQTT client identity for [`MQTT_LINK_ID`].
    MqttUserConfig {
        client_id: &'a str,
        username: &'a str,
        password: &'a str,
    },
    /// Open the MQTT session with auto-reconnect enabled.
    MqttConnect { host: &'a str, port: u16 },
    /// Publish a string payload.
    MqttPublish {
        topic: &'a str,
        payload: &'a str,
        qos: QoS,
        retain: bool,
    },
}

impl ModemCommand<'_> {
    /// Renders the command followed by CR/LF into `out`, replacing its
    /// previous contents.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Overflow`] when the command does not fit; `out`
    /// is left in an unspecified state.
    pub fn render<const N: usize>(&self, out: &mut String<N>) -> Result<(), FormatError> {
        out.clear();
        match *self {
            ModemCommand::Attention => push(out, "AT")?,
            ModemCommand::EchoOff => push(out, "ATE0")?,
            ModemCommand::StationMode => push(out, "AT+CWMODE=1")?,
            ModemCommand::JoinAccessPoint { ssid, password } => {
                push(out, "AT+CWJAP=")?;
                quoted(out, ssid)?;
                push(out, ",")?;
                quoted(out, password)?;
            }
            ModemCommand::ConfigureSntp {
                utc_offset_hours,
                server,
            } => {
                write!(out, "AT+CIPSNTPCFG=1,{utc_offset_hours},")
                    .map_err(|_| FormatError::Overflow)?;
                quoted(out, server)?;
            }
            ModemCommand::QuerySntpTime => push(out, "AT+CIPSNTPTIME?")?,
            ModemCommand::MqttUserConfig {
                client_id,
                username,
                password,
            } => {
                write!(out, "AT+MQTTUSERCFG={MQTT_LINK_ID},1,").map_err(|_| FormatError::Overflow)?;
                quoted(out, client_id)?;
                push(out, ",")?;
                quoted(out, username)?;
                push(out, ",")?;
                quoted(out, password)?;
                push(out, ",0,0,\"\"")?;
            }
            ModemCommand::MqttConnect { host, port } => {
                write!(out, "AT+MQTTCONN={MQTT_LINK_ID},").map_err(|_| FormatError::Overflow)?;
                quoted(out, host)?;
                write!(out, ",{port},1").map_err(|_| FormatError::Overflow)?;
            }
            ModemCommand::MqttPublish {
                topic,
                payload,
                qos,
                retain,
            } => {
                write!(out, "AT+MQTTPUB={MQTT_LINK_ID},").map_err(|_| FormatError::Overflow)?;
                quoted(out, topic)?;
                push(out, ",")?;
                quoted(out, payload)?;
                write!(out, ",{},{}", qos.as_u8(), u8::from(retain))
                    .map_err(|_| FormatError::Overflow)?;
            }
        }
        push(out, "\r\n")
    }
}

fn push<const N: usize>(out: &mut String<N>, text: &str) -> Result<(), FormatError> {
    out.push_str(text).map_err(|_| FormatError::Overflow)
}

fn quoted<const N: usize>(out: &mut String<N>, field: &str) -> Result<(), FormatError> {
    out.push('"').map_err(|_| FormatError::Overflow)?;
    for ch in field.chars() {
        if matches!(ch, ',' | '"' | '\\') {
            out.push('\\').map_err(|_| FormatError::Overflow)?;
        }
        out.push(ch).map_err(|_| FormatError::Overflow)?;
    }
    out.push('"').map_err(|_| FormatError::Overflow)
}
