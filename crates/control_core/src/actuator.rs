use parking_lot::Mutex;

use common::ComponentError;

/// Manipulated variable driven by a control loop.
///
/// `adjust_signal` is called once per loop tick, on the loop's worker
/// thread, while the loop holds its own lock.
pub trait Actuator: Send + Sync {
    fn id(&self) -> &str;

    fn adjust_signal(&self, output: f64) -> Result<(), ComponentError>;
}

/// In-process actuator that keeps every accepted signal.
///
/// Optional limits turn out-of-range signals into errors instead of
/// clamping them, so a misbehaving loop shows up in diagnostics.
pub struct SimulatedActuator {
    id: String,
    min: Option<f64>,
    max: Option<f64>,
    history: Mutex<Vec<f64>>,
}

impl SimulatedActuator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            min: None,
            max: None,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_limits(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn history(&self) -> Vec<f64> {
        self.history.lock().clone()
    }

    pub fn last_signal(&self) -> Option<f64> {
        self.history.lock().last().copied()
    }

    pub fn adjustments(&self) -> usize {
        self.history.lock().len()
    }
}

impl Actuator for SimulatedActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn adjust_signal(&self, output: f64) -> Result<(), ComponentError> {
        let below = self.min.is_some_and(|min| output < min);
        let above = self.max.is_some_and(|max| output > max);
        if below || above || !output.is_finite() {
            return Err(ComponentError::new(format!(
                "actuator {} rejected signal {output}",
                self.id
            )));
        }
        self.history.lock().push(output);
        Ok(())
    }
}
