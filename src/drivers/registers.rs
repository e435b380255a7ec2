//! Register access over an I2C bus.
//!
//! Every sensor on the bus exposes an 8-bit register pointer: a write of the
//! register index followed by a read returns consecutive registers.

use embedded_hal::i2c::I2c;

use crate::error::SensorError;

/// Longest burst written in a single transaction (register index excluded).
const MAX_WRITE_LEN: usize = 12;

/// Read `buf.len()` consecutive registers starting at `reg`.
///
/// Returns the number of bytes read.
pub fn read_registers<I: I2c>(
    bus: &mut I,
    address: u8,
    reg: u8,
    buf: &mut [u8],
) -> Result<usize, SensorError> {
    bus.write_read(address, &[reg], buf)?;
    Ok(buf.len())
}

/// Write `data` to consecutive registers starting at `reg`.
///
/// Returns the number of data bytes written. Bursts longer than
/// `MAX_WRITE_LEN` are truncated.
pub fn write_registers<I: I2c>(
    bus: &mut I,
    address: u8,
    reg: u8,
    data: &[u8],
) -> Result<usize, SensorError> {
    let len = data.len().min(MAX_WRITE_LEN);
    let mut frame = [0u8; MAX_WRITE_LEN + 1];
    frame[0] = reg;
    frame[1..=len].copy_from_slice(&data[..len]);
    bus.write(address, &frame[..=len])?;
    Ok(len)
}

pub fn read_register<I: I2c>(bus: &mut I, address: u8, reg: u8) -> Result<u8, SensorError> {
    let mut buf = [0u8; 1];
    read_registers(bus, address, reg, &mut buf)?;
    Ok(buf[0])
}

pub fn write_register<I: I2c>(
    bus: &mut I,
    address: u8,
    reg: u8,
    value: u8,
) -> Result<(), SensorError> {
    write_registers(bus, address, reg, &[value]).map(|_| ())
}
