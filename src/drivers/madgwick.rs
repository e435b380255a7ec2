use micromath::F32Ext;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

impl Quaternion {
    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// (roll, pitch, yaw) in radians.
    pub fn euler_angles(&self) -> (f32, f32, f32) {
        let q0 = self.w;
        let q1 = self.x;
        let q2 = self.y;
        let q3 = self.z;

        // Roll (x-axis rotation)
        let sinr_cosp = 2.0 * (q0 * q1 + q2 * q3);
        let cosr_cosp = 1.0 - 2.0 * (q1 * q1 + q2 * q2);
        let roll = sinr_cosp.atan2(cosr_cosp);

        // Pitch (y-axis rotation)
        let sinp = 2.0 * (q0 * q2 - q3 * q1);
        let pitch = if sinp.abs() >= 1.0 {
            // use 90 degrees if out of range
            core::f32::consts::FRAC_PI_2.copysign(sinp)
        } else {
            sinp.asin()
        };

        // Yaw (z-axis rotation)
        let siny_cosp = 2.0 * (q0 * q3 + q1 * q2);
        let cosy_cosp = 1.0 - 2.0 * (q2 * q2 + q3 * q3);
        let yaw = siny_cosp.atan2(cosy_cosp);

        (roll, pitch, yaw)
    }
}

/// Madgwick gradient-descent orientation filter, IMU (6-DoF) variant.
pub struct Madgwick {
    beta: f32,
    sample_freq: f32,
    pub q: Quaternion,
}

impl Madgwick {
    pub fn new(beta: f32, sample_freq: f32) -> Self {
        Self {
            beta,
            sample_freq,
            q: Quaternion::default(),
        }
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn sample_freq(&self) -> f32 {
        self.sample_freq
    }

    /// One filter step. Gyro in rad/s, accel in any unit (only its direction
    /// is used). A zero accel vector degrades the step to pure gyro integration.
    pub fn update_imu(&mut self, gx: f32, gy: f32, gz: f32, ax: f32, ay: f32, az: f32) {
        let mut q0 = self.q.w;
        let mut q1 = self.q.x;
        let mut q2 = self.q.y;
        let mut q3 = self.q.z;

        // Rate of change of quaternion from gyroscope
        let mut q_dot0 = 0.5 * (-q1 * gx - q2 * gy - q3 * gz);
        let mut q_dot1 = 0.5 * (q0 * gx + q2 * gz - q3 * gy);
        let mut q_dot2 = 0.5 * (q0 * gy - q1 * gz + q3 * gx);
        let mut q_dot3 = 0.5 * (q0 * gz + q1 * gy - q2 * gx);

        let accel_norm_sq = ax * ax + ay * ay + az * az;
        if accel_norm_sq > 0.0 {
            let recip_norm = accel_norm_sq.sqrt().recip();
            let ax = ax * recip_norm;
            let ay = ay * recip_norm;
            let az = az * recip_norm;

            let _2q0 = 2.0 * q0;
            let _2q1 = 2.0 * q1;
            let _2q2 = 2.0 * q2;
            let _2q3 = 2.0 * q3;
            let _4q0 = 4.0 * q0;
            let _4q1 = 4.0 * q1;
            let _4q2 = 4.0 * q2;
            let _8q1 = 8.0 * q1;
            let _8q2 = 8.0 * q2;
            let q0q0 = q0 * q0;
            let q1q1 = q1 * q1;
            let q2q2 = q2 * q2;
            let q3q3 = q3 * q3;

            // Gradient of the objective function (estimated minus measured gravity)
            let s0 = _4q0 * q2q2 + _2q2 * ax + _4q0 * q1q1 - _2q1 * ay;
            let s1 = _4q1 * q3q3 - _2q3 * ax + 4.0 * q0q0 * q1 - _2q0 * ay - _4q1
                + _8q1 * q1q1
                + _8q1 * q2q2
                + _4q1 * az;
            let s2 = 4.0 * q0q0 * q2 + _2q0 * ax + _4q2 * q3q3 - _2q3 * ay - _4q2
                + _8q2 * q1q1
                + _8q2 * q2q2
                + _4q2 * az;
            let s3 = 4.0 * q1q1 * q3 - _2q1 * ax + 4.0 * q2q2 * q3 - _2q2 * ay;

            // Already aligned with gravity: nothing to correct
            let step_norm_sq = s0 * s0 + s1 * s1 + s2 * s2 + s3 * s3;
            if step_norm_sq > 0.0 {
                let recip_norm = step_norm_sq.sqrt().recip();
                q_dot0 -= self.beta * s0 * recip_norm;
                q_dot1 -= self.beta * s1 * recip_norm;
                q_dot2 -= self.beta * s2 * recip_norm;
                q_dot3 -= self.beta * s3 * recip_norm;
            }
        }

        let dt = self.sample_freq.recip();
        q0 += q_dot0 * dt;
        q1 += q_dot1 * dt;
        q2 += q_dot2 * dt;
        q3 += q_dot3 * dt;

        // Normalise quaternion
        let norm_sq = q0 * q0 + q1 * q1 + q2 * q2 + q3 * q3;
        if norm_sq > 0.0 && norm_sq.is_finite() {
            let recip_norm = norm_sq.sqrt().recip();
            self.q.w = q0 * recip_norm;
            self.q.x = q1 * recip_norm;
            self.q.y = q2 * recip_norm;
            self.q.z = q3 * recip_norm;
        }
    }

    pub fn euler_angles(&self) -> (f32, f32, f32) {
        self.q.euler_angles()
    }
}
