//! Values the consumer decodes from the shared output buffer.
//!
//! Each reading is `Copy` and decoded from the task's slot only, so a reading
//! taken inside `Scheduler::with_buffer` is consistent with a single cycle.

use crate::drivers::madgwick::Quaternion;
use crate::drivers::{bmp280, mpu6050};

// ── Orientation ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OrientationReading {
    pub quaternion: Quaternion,
    /// Calibrated acceleration in g.
    pub accel: [f32; 3],
}

impl OrientationReading {
    /// Decode an Orientation slot. `None` if the slot is too short.
    pub fn from_slot(slot: &[u8]) -> Option<Self> {
        let slot = slot.get(..mpu6050::OUTPUT_LEN)?;
        let mut values = [0.0f32; 7];
        for (value, chunk) in values.iter_mut().zip(slot.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(Self {
            quaternion: Quaternion {
                w: values[0],
                x: values[1],
                y: values[2],
                z: values[3],
            },
            accel: [values[4], values[5], values[6]],
        })
    }

    /// The estimator writes all zeros until calibration completes; a unit
    /// quaternion is never zero.
    pub fn is_calibrated(&self) -> bool {
        let q = self.quaternion;
        q.w != 0.0 || q.x != 0.0 || q.y != 0.0 || q.z != 0.0
    }

    /// (roll, pitch, yaw) in radians, `None` while calibrating.
    pub fn euler_angles(&self) -> Option<(f32, f32, f32)> {
        self.is_calibrated().then(|| self.quaternion.euler_angles())
    }
}

// ── Pressure ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PressureReading {
    /// Upper 16 bits of the raw 20-bit ADC value (uncompensated).
    pub raw: u16,
}

impl PressureReading {
    pub fn from_slot(slot: &[u8]) -> Option<Self> {
        let slot = slot.get(..bmp280::OUTPUT_LEN)?;
        let word = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
        Some(Self { raw: word as u16 })
    }
}
