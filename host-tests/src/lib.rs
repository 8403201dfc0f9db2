//! Host-based tests for the OTA update flow
//! These tests run on the development machine, not on the ESP32

pub mod channel;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod concurrency;
