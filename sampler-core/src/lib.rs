#![no_std]

// Shared logic for the soil sampler.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing abstractions the other crates can adopt.

pub mod calibration;
pub mod clock;
pub mod protocol;
pub mod readiness;
pub mod sampler;
pub mod schedule;
pub mod telemetry;
