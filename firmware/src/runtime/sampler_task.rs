use embassy_time::Instant;

use super::FirmwareSampler;
use crate::telemetry::{self, TelemetryRecorder};

#[embassy_executor::task]
pub async fn run(mut sampler: FirmwareSampler, mut recorder: TelemetryRecorder) -> ! {
    sampler
        .run(|outcome| {
            telemetry::record_outcome(&mut recorder, outcome, Instant::now());
        })
        .await
}
