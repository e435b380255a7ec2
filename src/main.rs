#![no_std]
#![no_main]

mod board;

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use newjoy_node::config::{OrientationConfig, RadioConfig};
use newjoy_node::drivers::nrf24::{Address, Nrf24, PAYLOAD_SIZE};
use newjoy_node::drivers::{bmp280, mpu6050};
use newjoy_node::state::{OrientationReading, PressureReading};
use newjoy_node::tasks::TaskKind;
use newjoy_node::Scheduler;

use crate::board::{Board, SensorBus};

// ── Node layout ───────────────────────────────────────────────────────────────

/// Sampling period: 100 Hz
const PERIOD_MS: u32 = 10;
/// Orientation (28 bytes) then pressure (4 bytes): one radio frame
const ORIENTATION_OFFSET: usize = 0;
const PRESSURE_OFFSET: usize = 28;
const BUFFER_LEN: usize = 64;

/// Forward one frame to the hub every N cycles (50 ms)
const TELEMETRY_EVERY: u32 = 5;
/// Attitude log every N cycles (1 s)
const LOG_EVERY: u32 = 100;

const NODE_ADDRESS: Address = *b"node1";
const HUB_ADDRESS: Address = *b"hub00";

type NodeScheduler = Scheduler<'static, SensorBus>;

static SCHEDULER: StaticCell<NodeScheduler> = StaticCell::new();
static BUFFER: StaticCell<[u8; BUFFER_LEN]> = StaticCell::new();

// ── Sampling task ─────────────────────────────────────────────────────────────

#[embassy_executor::task]
async fn sampling_task(scheduler: &'static NodeScheduler) {
    scheduler.run().await
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL, I2C1, SPI1)
    let board = Board::init();

    // 2. Scheduler on I2C1, timer loop as its own task
    let scheduler = SCHEDULER.init(Scheduler::with_config(
        board.sensor_bus,
        OrientationConfig::default(),
    ));
    spawner.spawn(sampling_task(scheduler)).unwrap();

    let buffer = BUFFER.init([0; BUFFER_LEN]);
    defmt::unwrap!(scheduler.init(PERIOD_MS, buffer).await.map_err(|e| e.error));

    // 3. Sensors; a missing one leaves its slot at zero
    if let Err(err) = scheduler
        .register_task(TaskKind::Orientation, mpu6050::ADDRESS_AD0_LOW, ORIENTATION_OFFSET)
        .await
    {
        defmt::warn!("orientation task unavailable: {}", err);
    }
    if let Err(err) = scheduler
        .register_task(TaskKind::Pressure, bmp280::ADDRESS_SDO_LOW, PRESSURE_OFFSET)
        .await
    {
        defmt::warn!("pressure task unavailable: {}", err);
    }

    // 4. Radio, retried until the module answers
    let mut radio = Nrf24::new(board.radio_spi, board.radio_ce, RadioConfig::default());
    loop {
        match radio.setup(NODE_ADDRESS, HUB_ADDRESS) {
            Ok(_) => break,
            Err(err) => {
                defmt::warn!("radio setup failed: {}", err);
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
    let mut link = defmt::unwrap!(radio.link());

    // 5. Consumer loop
    let mut frame = [0u8; PAYLOAD_SIZE];
    loop {
        if !scheduler.wait_for_cycle().await {
            defmt::warn!("no sampling cycle within 10 periods");
            continue;
        }
        let cycle = scheduler.cycle_count();

        if cycle % TELEMETRY_EVERY == 0 {
            scheduler
                .with_buffer(|b| frame.copy_from_slice(&b[..PAYLOAD_SIZE]))
                .await;
            if let Err(err) = link.spoke_to_hub(&frame) {
                defmt::debug!("telemetry frame dropped: {}", err);
            }
        }

        if cycle % LOG_EVERY == 0 {
            let (orientation, pressure) = scheduler
                .with_buffer(|b| {
                    (
                        OrientationReading::from_slot(&b[ORIENTATION_OFFSET..]),
                        PressureReading::from_slot(&b[PRESSURE_OFFSET..]),
                    )
                })
                .await
                .unwrap_or((None, None));

            match orientation.and_then(|o| o.euler_angles()) {
                Some((roll, pitch, yaw)) => defmt::info!(
                    "rpy {} {} {} rad, pressure raw {}",
                    roll,
                    pitch,
                    yaw,
                    pressure.map_or(0, |p| p.raw)
                ),
                None => defmt::info!("calibrating, keep the node still and level"),
            }

            if let Ok(info) = link.error_info() {
                defmt::info!(
                    "link: {} retransmits, {} lost, worst cycle {} us",
                    info.retransmits,
                    info.lost_packets,
                    scheduler.max_cycle_duration().as_micros()
                );
            }
        }
    }
}
