//! Error types for the scheduler, the sensor drivers and the radio link.

use embedded_hal::{digital, i2c, spi};
use thiserror::Error;

use crate::drivers::nrf24::SendOutcome;

/// Sensor setup and sampling failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    #[error("I2C bus error: {0:?}")]
    Bus(i2c::ErrorKind),

    #[error("unexpected device identity 0x{found:02x}")]
    DeviceIdentityMismatch { found: u8 },
}

impl<E: i2c::Error> From<E> for SensorError {
    fn from(err: E) -> Self {
        SensorError::Bus(err.kind())
    }
}

/// Scheduler configuration and lifecycle errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerError {
    #[error("scheduler already initialised, call deinit() first")]
    AlreadyInitialized,

    #[error("scheduler not initialised")]
    NotInitialized,

    #[error("timer period must be a positive number of milliseconds")]
    InvalidPeriod,

    #[error("output buffer must not be empty")]
    BufferTooSmall,

    #[error("no free task slot")]
    CapacityExceeded,

    #[error("task output does not fit the buffer at the given offset")]
    BufferOverlapOrOverflow,

    #[error("unknown task kind {0}")]
    UnknownTaskKind(u8),

    #[error("task setup failed: {0}")]
    TaskSetupFailed(SensorError),
}

/// Radio link errors.
///
/// Timeouts and exhausted retries of a single `send` are not errors; they are
/// reported as a [`SendOutcome`]. The `SendFailed`/`ReceiveTimeout` variants are
/// only produced by the request/response helpers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    #[error("radio already set up, call teardown() first")]
    AlreadySetUp,

    #[error("radio not set up")]
    NotSetUp,

    #[error("nRF24L01+ hardware not responding")]
    HardwareNotResponding,

    #[error("payload must be 1..=32 bytes, got {0}")]
    InvalidPayloadSize(usize),

    #[error("payload of {0} bytes does not fit a radio frame")]
    PayloadTooLong(usize),

    #[error("receive pipe {0} does not exist (0..=5)")]
    InvalidPipe(u8),

    #[error("send failed: {0:?}")]
    SendFailed(SendOutcome),

    #[error("no reply within the receive window")]
    ReceiveTimeout,

    #[error("SPI bus error: {0:?}")]
    Bus(spi::ErrorKind),

    #[error("chip-enable pin error: {0:?}")]
    Pin(digital::ErrorKind),
}

impl RadioError {
    pub(crate) fn bus<E: spi::Error>(err: E) -> Self {
        RadioError::Bus(err.kind())
    }

    pub(crate) fn pin<E: digital::Error>(err: E) -> Self {
        RadioError::Pin(err.kind())
    }
}
