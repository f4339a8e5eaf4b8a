//! Capacitive soil probe read through the STM32G0 ADC.

#![cfg(target_os = "none")]

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::Output;
use embassy_stm32::peripherals::ADC1;
use sampler_core::calibration::RawSample;
use sampler_core::sampler::SampleSource;

/// Embassy ADC wrapper producing one raw probe sample per call.
pub struct ProbeAdc<'d> {
    adc: Adc<'d, ADC1>,
    channel: AnyAdcChannel<ADC1>,
    // Dropping the pin would float the probe supply.
    supply: Output<'d>,
    discard_next: bool,
}

impl<'d> ProbeAdc<'d> {
    /// Takes ownership of the converter, the probe's input channel, and the
    /// pin that powers the probe. The probe stays powered from here on.
    pub fn new(
        mut adc: Adc<'d, ADC1>,
        channel: AnyAdcChannel<ADC1>,
        mut supply: Output<'d>,
    ) -> Self {
        // The probe output is high impedance; the longest sample time settles it.
        adc.set_sample_time(SampleTime::CYCLES160_5);
        supply.set_high();
        Self {
            adc,
            channel,
            supply,
            discard_next: true,
        }
    }

    fn read_once(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.channel)
    }
}

impl SampleSource for ProbeAdc<'_> {
    fn read_raw(&mut self) -> RawSample {
        if !self.supply.is_set_high() {
            self.supply.set_high();
            self.discard_next = true;
        }
        // First conversion after power-up reads low.
        if self.discard_next {
            let _ = self.read_once();
            self.discard_next = false;
        }
        RawSample::from(self.read_once())
    }
}
