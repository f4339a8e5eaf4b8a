use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use sampler_core::readiness::ReadinessTracker;
use sampler_core::sampler::Sampler;

use crate::clock::SyncedClock;
use crate::config;
use crate::hw::probe::ProbeAdc;
use crate::modem::{ModemLink, ModemPublisher};
use crate::telemetry::TelemetryRecorder;

mod modem_task;
mod sampler_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Readiness flags shared by the modem task (writer) and the sampler (waiter).
pub(super) type Readiness = ReadinessTracker<CriticalSectionRawMutex>;

/// Sampler wired to the board's collaborators.
pub(super) type FirmwareSampler = Sampler<
    'static,
    CriticalSectionRawMutex,
    SyncedClock,
    ProbeAdc<'static>,
    ModemPublisher<'static>,
>;

pub(super) static READINESS: Readiness = ReadinessTracker::new();
pub(super) static MODEM_LINK: ModemLink = ModemLink::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal_config = hal::Config::default();
    let hal::Peripherals {
        ADC1,
        PA0,
        PA1,
        USART5,
        PB0,
        PB1,
        ..
    } = hal::init(hal_config);

    let probe_supply = Output::new(PA1, Level::High, Speed::Low);
    let probe = ProbeAdc::new(Adc::new(ADC1), PA0.degrade_adc(), probe_supply);
    let schedule = config::schedule().expect("window configuration");
    let sampler_config = config::sampler_config().expect("calibration configuration");

    let sampler = Sampler::new(
        &READINESS,
        schedule,
        SyncedClock,
        probe,
        MODEM_LINK.publisher(),
        sampler_config,
    );

    spawner
        .spawn(modem_task::run(&MODEM_LINK, &READINESS, USART5, PB0, PB1))
        .expect("failed to spawn modem task");

    spawner
        .spawn(sampler_task::run(sampler, TelemetryRecorder::new()))
        .expect("failed to spawn sampler task");

    core::future::pending::<()>().await;
}
