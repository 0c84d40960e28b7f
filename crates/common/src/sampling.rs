//! Measurement generation strategies.

use chrono::{FixedOffset, Utc};
use parking_lot::Mutex;
use rand::Rng;

use crate::error::ComponentError;
use crate::{Measurement, MeasurementUnit};

/// Produces one measurement per sensor tick.
///
/// Implementations may perform I/O but should return within the sensor's
/// sampling period; an overrun delays the following ticks.
pub trait SamplingStrategy: Send + Sync {
    fn sample(
        &self,
        sensor_id: &str,
        unit: MeasurementUnit,
        zone: &FixedOffset,
    ) -> Result<Measurement, ComponentError>;
}

fn now_in(zone: &FixedOffset) -> chrono::DateTime<FixedOffset> {
    Utc::now().with_timezone(zone)
}

/// Always reports the same quantity.
#[derive(Debug, Clone)]
pub struct ConstantSampling {
    quantity: f64,
}

impl ConstantSampling {
    pub fn new(quantity: f64) -> Self {
        Self { quantity }
    }
}

impl SamplingStrategy for ConstantSampling {
    fn sample(
        &self,
        sensor_id: &str,
        unit: MeasurementUnit,
        zone: &FixedOffset,
    ) -> Result<Measurement, ComponentError> {
        Ok(Measurement::new(sensor_id, self.quantity, unit, now_in(zone)))
    }
}

/// Uniformly distributed quantity in `[min, max)`.
#[derive(Debug, Clone)]
pub struct RandomSampling {
    min: f64,
    max: f64,
}

impl Default for RandomSampling {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl RandomSampling {
    /// Both bounds must be finite, `min < max`, and `max - min` must not
    /// overflow.
    pub fn new(min: f64, max: f64) -> Result<Self, ComponentError> {
        if !min.is_finite() || !max.is_finite() || !(max - min).is_finite() {
            return Err(ComponentError::new(format!(
                "random sampling range is not finite: [{min}, {max})"
            )));
        }
        if min >= max {
            return Err(ComponentError::new(format!(
                "random sampling range is empty: [{min}, {max})"
            )));
        }
        Ok(Self { min, max })
    }
}

impl SamplingStrategy for RandomSampling {
    fn sample(
        &self,
        sensor_id: &str,
        unit: MeasurementUnit,
        zone: &FixedOffset,
    ) -> Result<Measurement, ComponentError> {
        let quantity = rand::thread_rng().gen_range(self.min..self.max);
        Ok(Measurement::new(sensor_id, quantity, unit, now_in(zone)))
    }
}

const FILTER_WINDOW: usize = 5;

/// Simulated process signal `offset + amplitude * sin(0.1 * k)`, smoothed
/// with a moving average over the last few samples.
#[derive(Debug)]
pub struct SineSampling {
    offset: f64,
    amplitude: f64,
    state: Mutex<SineState>,
}

#[derive(Debug, Default)]
struct SineState {
    cycle: u64,
    history: Vec<f64>,
}

impl Default for SineSampling {
    fn default() -> Self {
        Self::new(50.0, 10.0)
    }
}

impl SineSampling {
    pub fn new(offset: f64, amplitude: f64) -> Self {
        Self {
            offset,
            amplitude,
            state: Mutex::new(SineState {
                cycle: 0,
                history: Vec::with_capacity(FILTER_WINDOW),
            }),
        }
    }
}

impl SamplingStrategy for SineSampling {
    fn sample(
        &self,
        sensor_id: &str,
        unit: MeasurementUnit,
        zone: &FixedOffset,
    ) -> Result<Measurement, ComponentError> {
        let mut state = self.state.lock();
        let raw = self.offset + (state.cycle as f64 * 0.1).sin() * self.amplitude;
        state.history.push(raw);
        if state.history.len() > FILTER_WINDOW {
            state.history.remove(0);
        }
        state.cycle += 1;

        let filtered = state.history.iter().sum::<f64>() / state.history.len() as f64;
        Ok(Measurement::new(sensor_id, filtered, unit, now_in(zone)))
    }
}
