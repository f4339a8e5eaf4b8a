//! Build-time configuration for the deployed sampler.
//!
//! Credentials come from the build environment so they never land in the
//! repository; everything else is a plain constant.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_time::Duration;
use sampler_core::calibration::{
    Calibration, CalibrationError, DEFAULT_SPAN, DEFAULT_ZERO_POINT,
};
use sampler_core::sampler::{
    DEFAULT_INVALID_TIME_BACKOFF, DEFAULT_POLL_INTERVAL, QoS, SamplerConfig,
};
use sampler_core::schedule::{ScheduleConfigError, WindowScheduler, WindowSpec};

/// Topic every scheduled reading is published to.
pub const TOPIC: &str = "garden/soil-moisture/s-1";

/// Daily sampling times as (hour, minute), local time.
pub const WINDOWS: [(u8, u8); 3] = [(5, 0), (10, 0), (14, 0)];

/// Probe count that maps to 100 %.
pub const ZERO_POINT: i32 = DEFAULT_ZERO_POINT;
/// Count delta between saturated and dry soil.
pub const SPAN: i32 = DEFAULT_SPAN;

pub const QOS: QoS = QoS::AtLeastOnce;
pub const RETAIN: bool = false;

pub const POLL_INTERVAL: Duration = DEFAULT_POLL_INTERVAL;
pub const INVALID_TIME_BACKOFF: Duration = DEFAULT_INVALID_TIME_BACKOFF;

pub const WIFI_SSID: &str = match option_env!("SAMPLER_WIFI_SSID") {
    Some(value) => value,
    None => "garden",
};

pub const WIFI_PASSWORD: &str = match option_env!("SAMPLER_WIFI_PASSWORD") {
    Some(value) => value,
    None => "",
};

pub const MQTT_HOST: &str = match option_env!("SAMPLER_MQTT_HOST") {
    Some(value) => value,
    None => "mqtt.local",
};

pub const MQTT_PORT: u16 = 1883;

pub const MQTT_CLIENT_ID: &str = "soil-sampler-s-1";

pub const MQTT_USER: &str = match option_env!("SAMPLER_MQTT_USER") {
    Some(value) => value,
    None => "",
};

pub const MQTT_PASSWORD: &str = match option_env!("SAMPLER_MQTT_PASSWORD") {
    Some(value) => value,
    None => "",
};

pub const SNTP_SERVER: &str = "pool.ntp.org";

/// Whole-hour offset of local time from UTC handed to the SNTP client.
pub const UTC_OFFSET_HOURS: i8 = 0;

/// How often the co-processor is asked for the current time.
pub const SNTP_QUERY_INTERVAL: Duration = Duration::from_secs(60);

/// Builds the window table from [`WINDOWS`] and [`TOPIC`].
pub fn schedule() -> Result<WindowScheduler, ScheduleConfigError> {
    let mut schedule = WindowScheduler::new();
    for (hour, minute) in WINDOWS {
        schedule.push(WindowSpec::new(hour, minute, TOPIC)?)?;
    }
    Ok(schedule)
}

pub fn sampler_config() -> Result<SamplerConfig, CalibrationError> {
    Ok(SamplerConfig {
        calibration: Calibration::new(ZERO_POINT, SPAN)?,
        poll_interval: POLL_INTERVAL,
        invalid_time_backoff: INVALID_TIME_BACKOFF,
        qos: QOS,
        retain: RETAIN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_schedule_is_valid() {
        let schedule = schedule().expect("valid windows");
        assert_eq!(schedule.len(), WINDOWS.len());
        assert_eq!(
            schedule.window(0).map(|window| window.topic.as_str()),
            Some(TOPIC)
        );
    }

    #[test]
    fn configured_calibration_is_valid() {
        let config = sampler_config().expect("non-zero span");
        assert_eq!(config.calibration.zero_point(), ZERO_POINT);
        assert_eq!(config.qos, QoS::AtLeastOnce);
        assert!(!config.retain);
    }
}
