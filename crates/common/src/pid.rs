use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Discrete PID state with a symmetric anti-windup clamp on the integral.
#[derive(Debug)]
pub struct PidController {
    gains: PidGains,
    integral_limit: f64,
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    pub const DEFAULT_INTEGRAL_LIMIT: f64 = 100.0;

    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral_limit: Self::DEFAULT_INTEGRAL_LIMIT,
            integral: 0.0,
            prev_error: None,
        }
    }

    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit.abs();
        self
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    pub fn compute(&mut self, error: f64, dt: f64) -> f64 {
        self.integral += error * dt;
        self.integral = self.integral.clamp(-self.integral_limit, self.integral_limit);

        // No derivative kick on the first sample.
        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error - prev) / dt,
            _ => 0.0,
        };
        self.prev_error = Some(error);

        (self.gains.kp * error) + (self.gains.ki * self.integral) + (self.gains.kd * derivative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P_ONLY: PidGains = PidGains {
        kp: 2.0,
        ki: 0.0,
        kd: 0.0,
    };

    #[test]
    fn proportional_only_scales_error() {
        let mut pid = PidController::new(P_ONLY);
        assert_eq!(pid.compute(0.5, 0.1), 1.0);
        assert_eq!(pid.compute(-0.25, 0.1), -0.5);
    }

    #[test]
    fn integral_is_clamped() {
        let mut pid = PidController::new(PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        })
        .with_integral_limit(1.0);

        let mut output = 0.0;
        for _ in 0..100 {
            output = pid.compute(1.0, 0.1);
        }
        assert!((output - 1.0).abs() < 1e-9);
    }

    #[test]
    fn derivative_skips_first_sample_and_reset_clears_history() {
        let mut pid = PidController::new(PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
        });
        assert_eq!(pid.compute(1.0, 0.5), 0.0);
        assert_eq!(pid.compute(2.0, 0.5), 2.0);

        pid.reset();
        assert_eq!(pid.compute(5.0, 0.5), 0.0);
    }
}
