//! STM32F405 node board: clocks and the buses the node drives.
//!
//! Wiring
//! - I2C1 @ 400 kHz (SCL=PB8, SDA=PB9): MPU6050 (0x68), BMP280 (0x76)
//! - SPI1 @ 8 MHz (SCK=PA5, MOSI=PA7, MISO=PA6, CSN=PA4): nRF24L01+
//! - PC4: nRF24L01+ CE

use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Level, Output, Pin, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::rcc::*;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::{bind_interrupts, peripherals, Config};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};

bind_interrupts!(struct Irqs {
    I2C1_EV => i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

const SENSOR_BUS_HZ: u32 = 400_000;
/// nRF24L01+ tops out at 10 MHz
const RADIO_SPI_HZ: u32 = 8_000_000;

pub type SensorBus = I2c<'static, peripherals::I2C1, NoDma, NoDma>;
pub type RadioSpi =
    ExclusiveDevice<Spi<'static, peripherals::SPI1, NoDma, NoDma>, Output<'static, AnyPin>, NoDelay>;
pub type RadioCe = Output<'static, AnyPin>;

pub struct Board {
    pub sensor_bus: SensorBus,
    pub radio_spi: RadioSpi,
    pub radio_ce: RadioCe,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2), // 168 MHz
            divq: None,
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        let p = embassy_stm32::init(config);

        // Blocking: the scheduler drives the bus from its own tick
        let sensor_bus = I2c::new(
            p.I2C1,
            p.PB8,
            p.PB9,
            Irqs,
            NoDma,
            NoDma,
            TimeHertz(SENSOR_BUS_HZ),
            Default::default(),
        );

        let mut spi_config = spi::Config::default();
        spi_config.frequency = TimeHertz(RADIO_SPI_HZ);
        let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
        let csn = Output::new(p.PA4.degrade(), Level::High, Speed::VeryHigh);
        // Output pins cannot fail
        let radio_spi = ExclusiveDevice::new_no_delay(spi, csn).unwrap();

        let radio_ce = Output::new(p.PC4.degrade(), Level::Low, Speed::VeryHigh);

        Self {
            sensor_bus,
            radio_spi,
            radio_ce,
        }
    }
}
