#![cfg_attr(not(test), no_std)]

//! newjoy-node: real-time core of a sensor/telemetry node.
//!
//! A timer-driven scheduler samples I2C sensors into a caller-owned buffer,
//! an MPU6050 pipeline turns raw inertial samples into an attitude quaternion,
//! and an nRF24L01+ driver moves 32-byte payloads over the air.

#[macro_use]
pub mod logging;

pub mod config;
pub mod drivers;
pub mod error;
pub mod state;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RadioError, SchedulerError, SensorError};
pub use tasks::scheduler::Scheduler;
