//! Static bias estimation for the inertial sensor.
//!
//! The device must be kept still (and level, for the accelerometer) until the
//! calibrator reports a bias. Raw samples are in sensor LSB.

/// Fixed-point shift of the moving averages.
const MA_SHIFT: u32 = 16;
/// Smoothing divisor of the moving averages.
const MA_DIVISOR: i64 = 200;

/// Depth of the variance window.
const WINDOW: usize = 10;
/// Mean absolute successive difference (LSB) under which the gyro counts as still.
const STILL_THRESHOLD: i32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationMethod {
    /// Exponential moving average, frozen after `seconds` of samples.
    MovingAverage { seconds: u32 },
    /// Ring of the last 10 samples, frozen once the gyro is still.
    VarianceWindow,
    /// Zero bias, calibrated on the first sample.
    None,
}

/// Raw sensor offsets in LSB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bias {
    pub gyro: [i16; 3],
    pub accel: [i16; 3],
}

pub enum Calibrator {
    MovingAverage(MovingAverage),
    VarianceWindow(VarianceWindow),
    None,
}

impl Calibrator {
    pub fn new(method: CalibrationMethod, period_ms: u32) -> Self {
        match method {
            CalibrationMethod::MovingAverage { seconds } => {
                Self::MovingAverage(MovingAverage::new(seconds * 1000 / period_ms.max(1)))
            }
            CalibrationMethod::VarianceWindow => Self::VarianceWindow(VarianceWindow::new()),
            CalibrationMethod::None => Self::None,
        }
    }

    /// Feed one raw sample. Returns the bias once the method has converged;
    /// gravity is still contained in the accelerometer bias.
    pub fn feed(&mut self, accel: [i16; 3], gyro: [i16; 3]) -> Option<Bias> {
        match self {
            Self::MovingAverage(ma) => ma.feed(accel, gyro),
            Self::VarianceWindow(window) => window.feed(accel, gyro),
            Self::None => Some(Bias::default()),
        }
    }
}

pub struct MovingAverage {
    gyro: [i32; 3],
    accel: [i32; 3],
    step: u32,
    total_steps: u32,
}

impl MovingAverage {
    pub fn new(total_steps: u32) -> Self {
        Self {
            gyro: [0; 3],
            accel: [0; 3],
            step: 0,
            total_steps,
        }
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn feed(&mut self, accel: [i16; 3], gyro: [i16; 3]) -> Option<Bias> {
        self.step += 1;
        if self.step >= self.total_steps {
            let mut bias = Bias::default();
            for i in 0..3 {
                bias.gyro[i] = (self.gyro[i] >> MA_SHIFT) as i16;
                bias.accel[i] = (self.accel[i] >> MA_SHIFT) as i16;
            }
            return Some(bias);
        }

        for i in 0..3 {
            self.gyro[i] = ma_step(self.gyro[i], gyro[i]);
            self.accel[i] = ma_step(self.accel[i], accel[i]);
        }
        None
    }
}

fn ma_step(ma: i32, value: i16) -> i32 {
    let ma = ma as i64;
    let target = (value as i64) << MA_SHIFT;
    (ma + (target - ma) / MA_DIVISOR) as i32
}

pub struct VarianceWindow {
    gyro: [[i16; 3]; WINDOW],
    accel: [[i16; 3]; WINDOW],
    fill: usize,
    len: usize,
}

impl VarianceWindow {
    pub fn new() -> Self {
        Self {
            gyro: [[0; 3]; WINDOW],
            accel: [[0; 3]; WINDOW],
            fill: 0,
            len: 0,
        }
    }

    pub fn feed(&mut self, accel: [i16; 3], gyro: [i16; 3]) -> Option<Bias> {
        self.gyro[self.fill] = gyro;
        self.accel[self.fill] = accel;
        self.fill = (self.fill + 1) % WINDOW;
        self.len = (self.len + 1).min(WINDOW);

        if self.len < WINDOW {
            return None;
        }
        if (0..3).any(|axis| variance(&self.gyro, axis) >= STILL_THRESHOLD) {
            return None;
        }

        // A still gyro implies no linear acceleration either
        let mut bias = Bias::default();
        for axis in 0..3 {
            bias.gyro[axis] = average(&self.gyro, axis);
            bias.accel[axis] = average(&self.accel, axis);
        }
        Some(bias)
    }
}

impl Default for VarianceWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean absolute difference between neighbouring ring slots.
fn variance(ring: &[[i16; 3]; WINDOW], axis: usize) -> i32 {
    let sum: i32 = ring
        .windows(2)
        .map(|pair| (pair[0][axis] as i32 - pair[1][axis] as i32).abs())
        .sum();
    sum / (WINDOW as i32 - 1)
}

fn average(ring: &[[i16; 3]; WINDOW], axis: usize) -> i16 {
    let sum: i32 = ring.iter().map(|s| s[axis] as i32).sum();
    (sum / WINDOW as i32) as i16
}
