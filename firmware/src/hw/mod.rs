//! Board peripherals wired into the core sampler traits.

pub mod probe;
