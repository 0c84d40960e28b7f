//! Control algorithms a loop can run.
//!
//! A behaviour maps `(setpoint, measured quantity)` to an actuator output.
//! Loops hold behaviours as `Arc<dyn ControlBehaviour>` and may swap them
//! at runtime.

use std::fmt;

use parking_lot::Mutex;

use crate::error::ComponentError;
use crate::pid::{PidController, PidGains};

pub trait ControlBehaviour: Send + Sync {
    /// Short human readable name used in logs.
    fn name(&self) -> &str;

    fn compute(&self, setpoint: f64, measured: f64) -> Result<f64, ComponentError>;
}

impl fmt::Debug for dyn ControlBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn finite(behaviour: &str, output: f64) -> Result<f64, ComponentError> {
    if output.is_finite() {
        Ok(output)
    } else {
        Err(ComponentError::new(format!(
            "{behaviour} produced a non-finite output ({output})"
        )))
    }
}

/// `output = gain * (setpoint - measured)`
#[derive(Debug, Clone)]
pub struct ProportionalBehaviour {
    gain: f64,
    name: String,
}

impl ProportionalBehaviour {
    pub fn new(gain: f64) -> Self {
        Self {
            gain,
            name: format!("proportional(gain={gain})"),
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl ControlBehaviour for ProportionalBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, setpoint: f64, measured: f64) -> Result<f64, ComponentError> {
        finite(&self.name, self.gain * (setpoint - measured))
    }
}

/// Two-position control: `on_output` while the measurement sits below
/// `setpoint - hysteresis`, `off_output` otherwise.
#[derive(Debug, Clone)]
pub struct OnOffBehaviour {
    on_output: f64,
    off_output: f64,
    hysteresis: f64,
    name: String,
}

impl OnOffBehaviour {
    pub fn new(on_output: f64, off_output: f64, hysteresis: f64) -> Self {
        Self {
            on_output,
            off_output,
            hysteresis: hysteresis.abs(),
            name: format!("on_off(on={on_output}, off={off_output})"),
        }
    }
}

impl ControlBehaviour for OnOffBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, setpoint: f64, measured: f64) -> Result<f64, ComponentError> {
        if measured < setpoint - self.hysteresis {
            Ok(self.on_output)
        } else {
            Ok(self.off_output)
        }
    }
}

/// PID control over a fixed sample interval.
///
/// Unlike the other stock behaviours this one is stateful: integral and
/// previous error persist between calls, so it must not be shared between
/// loops.
pub struct PidBehaviour {
    controller: Mutex<PidController>,
    dt_secs: f64,
    name: String,
}

impl PidBehaviour {
    pub fn new(gains: PidGains, dt_secs: f64) -> Self {
        Self {
            controller: Mutex::new(PidController::new(gains)),
            dt_secs,
            name: format!("pid(kp={}, ki={}, kd={})", gains.kp, gains.ki, gains.kd),
        }
    }

    pub fn with_integral_limit(self, limit: f64) -> Self {
        let controller = self.controller.into_inner().with_integral_limit(limit);
        Self {
            controller: Mutex::new(controller),
            ..self
        }
    }

    pub fn reset(&self) {
        self.controller.lock().reset();
    }
}

impl ControlBehaviour for PidBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, setpoint: f64, measured: f64) -> Result<f64, ComponentError> {
        let output = self
            .controller
            .lock()
            .compute(setpoint - measured, self.dt_secs);
        finite(&self.name, output)
    }
}

/// Adapts a closure into a behaviour.
pub struct FnBehaviour<F> {
    name: String,
    f: F,
}

impl<F> FnBehaviour<F>
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ControlBehaviour for FnBehaviour<F>
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, setpoint: f64, measured: f64) -> Result<f64, ComponentError> {
        finite(&self.name, (self.f)(setpoint, measured))
    }
}
