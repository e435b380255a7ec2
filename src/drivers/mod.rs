pub mod registers;

pub mod bmp280;
pub mod calibration;
pub mod madgwick;
pub mod mpu6050;
pub mod nrf24;
