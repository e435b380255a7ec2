use embedded_hal::i2c::I2c;

use crate::config::OrientationConfig;
use crate::drivers::calibration::{Bias, Calibrator};
use crate::drivers::madgwick::{Madgwick, Quaternion};
use crate::drivers::registers::{read_register, read_registers, write_register};
use crate::error::SensorError;

pub const ADDRESS_AD0_LOW: u8 = 0x68;
pub const ADDRESS_AD0_HIGH: u8 = 0x69;

const REG_SMPLRT_DIV: u8 = 0x19;
const REG_CONFIG: u8 = 0x1A;
const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_PWR_MGMT_2: u8 = 0x6C;
const REG_WHO_AM_I: u8 = 0x75;

/// Genuine part answers with its default address, the clone with 0x72.
const IDENTITIES: [u8; 2] = [ADDRESS_AD0_LOW, 0x72];

const CLOCK_PLL_XGYRO: u8 = 0x01;
const SAMPLE_RATE_DIV: u8 = 0x20;
const DLPF_188HZ: u8 = 0x01;
const FS_SEL_MASK: u8 = 0b11 << 3;

/// accel xyz + temperature + gyro xyz, big-endian words
pub const RAW_BLOCK_LEN: usize = 14;
/// quaternion wxyz + calibrated accel xyz, f32 little-endian
pub const OUTPUT_LEN: usize = 7 * 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl GyroRange {
    fn fs_sel(self) -> u8 {
        self as u8
    }

    /// LSB per °/s
    pub fn scale(self) -> f32 {
        let full_scale = match self {
            GyroRange::Dps250 => 250.0,
            GyroRange::Dps500 => 500.0,
            GyroRange::Dps1000 => 1000.0,
            GyroRange::Dps2000 => 2000.0,
        };
        32768.0 / full_scale
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    fn fs_sel(self) -> u8 {
        self as u8
    }

    /// LSB per g
    pub fn scale(self) -> f32 {
        let full_scale = match self {
            AccelRange::G2 => 2.0,
            AccelRange::G4 => 4.0,
            AccelRange::G8 => 8.0,
            AccelRange::G16 => 16.0,
        };
        32768.0 / full_scale
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationMode {
    Uncalibrated,
    Calibrated,
}

/// One decoded register block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSample {
    pub accel: [i16; 3],
    pub temperature: i16,
    pub gyro: [i16; 3],
}

impl RawSample {
    pub fn from_be_bytes(block: &[u8; RAW_BLOCK_LEN]) -> Self {
        let word = |i: usize| i16::from_be_bytes([block[2 * i], block[2 * i + 1]]);
        Self {
            accel: [word(0), word(1), word(2)],
            temperature: word(3),
            gyro: [word(4), word(5), word(6)],
        }
    }
}

/// MPU6050 orientation estimator: calibration state plus the attitude filter.
pub struct Mpu6050 {
    address: u8,
    gyro_scale: f32,
    accel_scale: f32,
    mode: CalibrationMode,
    bias: Bias,
    calibrator: Calibrator,
    filter: Madgwick,
}

impl Mpu6050 {
    /// Check the identity register and configure the device for sampling
    /// every `period_ms`.
    pub fn setup<I: I2c>(
        bus: &mut I,
        address: u8,
        period_ms: u32,
        config: &OrientationConfig,
    ) -> Result<Self, SensorError> {
        let identity = read_register(bus, address, REG_WHO_AM_I)?;
        if !IDENTITIES.contains(&identity) {
            log_warn!("mpu6050 @0x{:x}: unexpected WHO_AM_I 0x{:x}", address, identity);
            return Err(SensorError::DeviceIdentityMismatch { found: identity });
        }

        // Wake up, gyro PLL as clock source, all axes enabled
        write_register(bus, address, REG_PWR_MGMT_1, CLOCK_PLL_XGYRO)?;
        write_register(bus, address, REG_PWR_MGMT_2, 0)?;
        write_register(bus, address, REG_SMPLRT_DIV, SAMPLE_RATE_DIV)?;
        write_register(bus, address, REG_CONFIG, DLPF_188HZ)?;

        let gyro = read_register(bus, address, REG_GYRO_CONFIG)?;
        let gyro = (gyro & !FS_SEL_MASK) | (config.gyro_range.fs_sel() << 3);
        write_register(bus, address, REG_GYRO_CONFIG, gyro)?;

        let accel = read_register(bus, address, REG_ACCEL_CONFIG)?;
        let accel = (accel & !FS_SEL_MASK) | (config.accel_range.fs_sel() << 3);
        write_register(bus, address, REG_ACCEL_CONFIG, accel)?;

        log_info!("mpu6050 @0x{:x}: configured, calibrating", address);

        Ok(Self::new(address, period_ms, config))
    }

    /// Estimator state without touching the device.
    pub fn new(address: u8, period_ms: u32, config: &OrientationConfig) -> Self {
        let period_ms = period_ms.max(1);
        Self {
            address,
            gyro_scale: config.gyro_range.scale(),
            accel_scale: config.accel_range.scale(),
            mode: CalibrationMode::Uncalibrated,
            bias: Bias::default(),
            calibrator: Calibrator::new(config.calibration, period_ms),
            filter: Madgwick::new(config.beta, 1000.0 / period_ms as f32),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    pub fn bias(&self) -> Bias {
        self.bias
    }

    pub fn quaternion(&self) -> Quaternion {
        self.filter.q
    }

    pub fn gyro_scale(&self) -> f32 {
        self.gyro_scale
    }

    pub fn accel_scale(&self) -> f32 {
        self.accel_scale
    }

    pub fn sample_freq(&self) -> f32 {
        self.filter.sample_freq()
    }

    /// Read one register block and write the estimator output into `out`.
    pub fn sample<I: I2c>(&mut self, bus: &mut I, out: &mut [u8]) -> Result<(), SensorError> {
        let mut block = [0u8; RAW_BLOCK_LEN];
        read_registers(bus, self.address, REG_ACCEL_XOUT_H, &mut block)?;
        self.process(RawSample::from_be_bytes(&block), out);
        Ok(())
    }

    /// Calibrate or filter one raw sample. `out` must hold `OUTPUT_LEN` bytes.
    pub fn process(&mut self, raw: RawSample, out: &mut [u8]) {
        let out = &mut out[..OUTPUT_LEN];
        match self.mode {
            CalibrationMode::Uncalibrated => {
                // Zero output marks "not calibrated yet"
                out.fill(0);
                if let Some(bias) = self.calibrator.feed(raw.accel, raw.gyro) {
                    self.finish_calibration(bias);
                }
            }
            CalibrationMode::Calibrated => {
                let mut gyro = [0.0f32; 3];
                let mut accel = [0.0f32; 3];
                for i in 0..3 {
                    gyro[i] = (raw.gyro[i] as f32 - self.bias.gyro[i] as f32) / self.gyro_scale;
                    accel[i] =
                        (raw.accel[i] as f32 - self.bias.accel[i] as f32) / self.accel_scale;
                }

                self.filter.update_imu(
                    gyro[0].to_radians(),
                    gyro[1].to_radians(),
                    gyro[2].to_radians(),
                    accel[0],
                    accel[1],
                    accel[2],
                );

                let q = self.filter.q;
                let values = [q.w, q.x, q.y, q.z, accel[0], accel[1], accel[2]];
                for (chunk, value) in out.chunks_exact_mut(4).zip(values) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }

    fn finish_calibration(&mut self, mut bias: Bias) {
        // Measured bias assumes the device was level: remove 1 g from the vertical axis
        if !matches!(self.calibrator, Calibrator::None) {
            bias.accel[2] = bias.accel[2].saturating_sub(self.accel_scale as i16);
        }
        self.bias = bias;
        self.mode = CalibrationMode::Calibrated;
        log_info!(
            "mpu6050 @0x{:x}: calibrated, gyro bias {:?} accel bias {:?}",
            self.address,
            bias.gyro,
            bias.accel
        );
    }
}
