//! Node configuration.
//!
//! Tunables that the firmware may want to change live here; protocol timing
//! constants stay next to the code that depends on them.

use crate::drivers::calibration::CalibrationMethod;
use crate::drivers::mpu6050::{AccelRange, GyroRange};
use crate::drivers::nrf24::{CrcLength, DataRate, PowerLevel};

/// Maximum number of periodic tasks the scheduler accepts.
pub const MAX_TASKS: usize = 8;

/// `wait_for_cycle` gives up after this many periods.
pub const CYCLE_WAIT_PERIODS: u64 = 10;

/// Orientation pipeline settings, applied at task setup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientationConfig {
    pub gyro_range: GyroRange,
    pub accel_range: AccelRange,
    pub calibration: CalibrationMethod,
    /// Madgwick filter gain
    pub beta: f32,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            gyro_range: GyroRange::Dps1000,
            accel_range: AccelRange::G4,
            calibration: CalibrationMethod::MovingAverage { seconds: 5 },
            beta: 0.1,
        }
    }
}

/// Radio link settings, applied at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadioConfig {
    /// RF channel, clamped to 125 (2.525 GHz).
    pub channel: u8,
    pub power: PowerLevel,
    pub data_rate: DataRate,
    pub crc: CrcLength,
    /// Hardware auto-retransmit count (0..=15).
    pub retry_count: u8,
    /// Auto-retransmit delay in 250 µs steps, minus one (0..=15).
    pub retry_delay_units: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            // Above the Wi-Fi channels
            channel: 100,
            power: PowerLevel::Dbm0,
            data_rate: DataRate::Kbps250,
            crc: CrcLength::TwoBytes,
            retry_count: 4,
            retry_delay_units: 6,
        }
    }
}
