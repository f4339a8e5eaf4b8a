use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{HostReadiness, Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Daily)?;
    record_profile(TranscriptProfile::Offline)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let readiness = HostReadiness::new();
    let mut session = Session::with_profile(&readiness, profile)?;
    let script: &[&str] = match profile {
        TranscriptProfile::Daily => &[
            "link up",
            "session up",
            "adc 500",
            "clock set 2024-06-01 04:58",
            "run 5",
            "adc 4095",
            "clock set 2024-06-01 09:59:30",
            "tick",
            "clock advance 30",
            "tick",
            "tick",
            "clock set 2024-06-02 00:00:05",
            "tick",
            "status",
            "telemetry",
        ],
        TranscriptProfile::Offline => &[
            "tick",
            "urc WIFI CONNECTED",
            "urc WIFI GOT IP",
            "tick",
            "urc +MQTTCONNECTED:0,1,\"broker.local\",\"1883\",\"\",1",
            "tick",
            "urc +CIPSNTPTIME:Thu Jan 01 00:00:03 1970",
            "tick",
            "urc +CIPSNTPTIME:Sat Jun 01 13:59:58 2024",
            "broker reject",
            "run 3",
            "status",
            "urc +MQTTDISCONNECTED:0",
            "tick",
            "telemetry",
        ],
    };

    for command in script {
        let _ = session.handle_command(command)?;
    }
    Ok(())
}
