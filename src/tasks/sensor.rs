//! Periodic sensor tasks: what kinds exist, where their output goes, and the
//! per-kind driver state owned by a registered task.

use embedded_hal::i2c::I2c;

use crate::config::OrientationConfig;
use crate::drivers::bmp280::{self, Bmp280};
use crate::drivers::mpu6050::{self, Mpu6050};
use crate::error::{SchedulerError, SensorError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskKind {
    /// MPU6050 attitude quaternion + calibrated acceleration.
    Orientation = 1,
    /// BMP280 raw pressure.
    Pressure = 2,
}

impl TaskKind {
    /// Bytes the task writes into the shared buffer each cycle.
    pub const fn buffer_len(self) -> usize {
        match self {
            TaskKind::Orientation => mpu6050::OUTPUT_LEN,
            TaskKind::Pressure => bmp280::OUTPUT_LEN,
        }
    }

    pub const fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for TaskKind {
    type Error = SchedulerError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(TaskKind::Orientation),
            2 => Ok(TaskKind::Pressure),
            other => Err(SchedulerError::UnknownTaskKind(other)),
        }
    }
}

/// Where a task's output lives in the shared buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskSlot {
    pub offset: usize,
    pub len: usize,
}

impl TaskSlot {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn overlaps(&self, other: &TaskSlot) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    pub fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.offset..self.end()]
    }
}

/// Driver state of one registered task.
pub enum SensorTask {
    Orientation(Mpu6050),
    Pressure(Bmp280),
}

impl SensorTask {
    pub async fn setup<I: I2c>(
        kind: TaskKind,
        bus: &mut I,
        address: u8,
        period_ms: u32,
        config: &OrientationConfig,
    ) -> Result<Self, SensorError> {
        match kind {
            TaskKind::Orientation => {
                Mpu6050::setup(bus, address, period_ms, config).map(SensorTask::Orientation)
            }
            TaskKind::Pressure => Bmp280::setup(bus, address).await.map(SensorTask::Pressure),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            SensorTask::Orientation(_) => TaskKind::Orientation,
            SensorTask::Pressure(_) => TaskKind::Pressure,
        }
    }

    pub fn address(&self) -> u8 {
        match self {
            SensorTask::Orientation(mpu) => mpu.address(),
            SensorTask::Pressure(bmp) => bmp.address(),
        }
    }

    /// `out` is exactly the task's slot.
    pub fn sample<I: I2c>(&mut self, bus: &mut I, out: &mut [u8]) -> Result<(), SensorError> {
        match self {
            SensorTask::Orientation(mpu) => mpu.sample(bus, out),
            SensorTask::Pressure(bmp) => bmp.sample(bus, out),
        }
    }

    pub fn teardown(self) {
        log_debug!("task {:?} @0x{:x}: released", self.kind(), self.address());
    }
}

/// A registered task: its driver state and its output slot.
pub struct TaskDescriptor {
    pub slot: TaskSlot,
    pub task: SensorTask,
}
