use embassy_time::Timer;
use embedded_hal::i2c::I2c;

use crate::drivers::registers::{read_register, read_registers, write_register};
use crate::error::SensorError;

pub const ADDRESS_SDO_LOW: u8 = 0x76;
pub const ADDRESS_SDO_HIGH: u8 = 0x77;

const REG_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS_MSB: u8 = 0xF7;

const CHIP_ID: u8 = 0x58;
const RESET_WORD: u8 = 0xB6;
const RESET_WAIT_MS: u64 = 50;

// 0.5 ms standby, IIR filter off, no 3-wire SPI
const CONFIG_VALUE: u8 = (0b000 << 5) | (0b000 << 2);
// temperature skipped, 4x pressure oversampling, normal mode
const CTRL_MEAS_VALUE: u8 = (0b000 << 5) | (0b011 << 2) | 0b11;

/// Upper 16 bits of the raw pressure, little-endian, padded to a word.
pub const OUTPUT_LEN: usize = 4;

pub struct Bmp280 {
    address: u8,
}

impl Bmp280 {
    pub async fn setup<I: I2c>(bus: &mut I, address: u8) -> Result<Self, SensorError> {
        let id = read_register(bus, address, REG_ID)?;
        if id != CHIP_ID {
            // BME280 (0x60) and engineering samples answer differently but share the map
            log_debug!("bmp280 @0x{:x}: chip id 0x{:x}", address, id);
        }

        write_register(bus, address, REG_RESET, RESET_WORD)?;
        Timer::after_millis(RESET_WAIT_MS).await;

        write_register(bus, address, REG_CONFIG, CONFIG_VALUE)?;
        write_register(bus, address, REG_CTRL_MEAS, CTRL_MEAS_VALUE)?;

        log_info!("bmp280 @0x{:x}: configured", address);
        Ok(Self { address })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// The full 20-bit conversion is only stable in the slow modes, so only
    /// the two upper bytes are kept.
    pub fn sample<I: I2c>(&mut self, bus: &mut I, out: &mut [u8]) -> Result<(), SensorError> {
        let mut raw = [0u8; 3];
        read_registers(bus, self.address, REG_PRESS_MSB, &mut raw)?;
        out[..OUTPUT_LEN].copy_from_slice(&[raw[1], raw[0], 0, 0]);
        Ok(())
    }
}
