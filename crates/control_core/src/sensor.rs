//! Periodically sampled sensors and their listeners.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Offset, Utc};
use common::{
    ComponentError, ControlError, ControlResult, CycleRecorder, Diagnostics, Measurement,
    MeasurementUnit, SamplingStrategy, TickFailure, TickOrigin, TickStage,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::panic_message;
use crate::registry::LoopRegistry;
use crate::timer::{PeriodicTimer, TickStatus};

/// Receives every measurement a sensor takes, on the sensor's worker thread.
pub trait SensorListener: Send + Sync {
    fn on_measurement(&self, measurement: &Measurement) -> Result<(), ComponentError>;
}

/// Listener that keeps a copy of everything it receives.
#[derive(Default)]
pub struct MeasurementLog {
    received: Mutex<Vec<Measurement>>,
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SensorListener for MeasurementLog {
    fn on_measurement(&self, measurement: &Measurement) -> Result<(), ComponentError> {
        self.received.lock().push(measurement.clone());
        Ok(())
    }
}

fn same_listener<L: ?Sized>(a: &Arc<dyn SensorListener>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// State shared between the sensor handle and its worker.
struct Shared {
    id: String,
    unit: MeasurementUnit,
    strategy: Arc<dyn SamplingStrategy>,
    listeners: Mutex<Vec<Arc<dyn SensorListener>>>,
    latest: RwLock<Option<Measurement>>,
    diagnostics: Arc<Diagnostics>,
}

impl Shared {
    fn report(&self, stage: TickStage, message: impl Into<String>) {
        self.diagnostics.report(TickFailure::new(
            TickOrigin::Sensor(self.id.clone()),
            stage,
            message,
        ));
    }

    fn take_measurement(&self) -> TickStatus {
        let zone = Utc.fix();
        let sampled = panic::catch_unwind(AssertUnwindSafe(|| {
            self.strategy.sample(&self.id, self.unit, &zone)
        }));
        let measurement = match sampled {
            Ok(Ok(measurement)) => measurement,
            Ok(Err(err)) => {
                self.report(TickStage::Sampling, err.to_string());
                return TickStatus::Failed;
            }
            Err(payload) => {
                self.report(TickStage::Panic, panic_message(payload.as_ref()));
                return TickStatus::Failed;
            }
        };
        *self.latest.write() = Some(measurement.clone());

        // Deliver to a snapshot so listeners may (un)subscribe from a callback.
        let snapshot = self.listeners.lock().clone();
        let mut status = TickStatus::Completed;
        for listener in &snapshot {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_measurement(&measurement)));
            match delivered {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.report(TickStage::Listener, err.to_string());
                    status = TickStatus::Failed;
                }
                Err(payload) => {
                    self.report(TickStage::Panic, panic_message(payload.as_ref()));
                    status = TickStatus::Failed;
                }
            }
        }
        self.diagnostics.record_tick();
        status
    }
}

/// A controlled-variable source sampled on its own worker thread.
///
/// The identifier is reserved in the registry for as long as the sensor
/// lives. Listeners may query the sensor but must not start or stop it.
pub struct Sensor {
    shared: Arc<Shared>,
    sampling_period: Duration,
    registry: Arc<LoopRegistry>,
    recorder: Option<CycleRecorder>,
    // Serializes start/stop; held across the worker join.
    lifecycle: Mutex<()>,
    // Only ever locked briefly.
    timer: Mutex<Option<PeriodicTimer>>,
}

impl Sensor {
    pub fn new(
        registry: &Arc<LoopRegistry>,
        id: impl Into<String>,
        sampling_period: Duration,
        unit: MeasurementUnit,
        strategy: Arc<dyn SamplingStrategy>,
    ) -> ControlResult<Self> {
        let id = id.into();
        if sampling_period.is_zero() {
            return Err(ControlError::InvalidPeriod {
                owner: format!("sensor {id}"),
            });
        }
        registry.register_sensor_id(&id)?;
        info!(sensor = %id, period = ?sampling_period, %unit, "sensor created");

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                unit,
                strategy,
                listeners: Mutex::new(Vec::new()),
                latest: RwLock::new(None),
                diagnostics: registry.diagnostics().clone(),
            }),
            sampling_period,
            registry: registry.clone(),
            recorder: None,
            lifecycle: Mutex::new(()),
            timer: Mutex::new(None),
        })
    }

    pub fn with_recorder(mut self, recorder: CycleRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn unit(&self) -> MeasurementUnit {
        self.shared.unit
    }

    pub fn sampling_period(&self) -> Duration {
        self.sampling_period
    }

    /// Begins periodic sampling. Calling it while already measuring does
    /// nothing; calling it after `stop_measuring` resumes with a new schedule.
    pub fn start_measuring(&self) -> ControlResult<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.timer.lock().is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let mut timer = PeriodicTimer::new(self.id(), self.sampling_period, move || {
            shared.take_measurement()
        })?;
        if let Some(recorder) = &self.recorder {
            timer = timer.with_recorder(recorder.clone());
        }
        let mut slot = self.timer.lock();
        timer.start()?;
        *slot = Some(timer);
        drop(slot);
        debug!(sensor = %self.id(), "measuring started");
        Ok(())
    }

    /// Stops sampling. Returns once no further sample will be taken.
    pub fn stop_measuring(&self) {
        let _lifecycle = self.lifecycle.lock();
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.stop();
            debug!(sensor = %self.id(), "measuring stopped");
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Subscribes `listener`. Identity is by pointer: the same `Arc` may
    /// only be registered once.
    pub fn add_listener(&self, listener: Arc<dyn SensorListener>) -> ControlResult<()> {
        let mut listeners = self.shared.listeners.lock();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return Err(ControlError::DuplicateListener {
                sensor: self.id().to_owned(),
            });
        }
        listeners.push(listener);
        Ok(())
    }

    /// Unsubscribes `listener`. A broadcast already in flight may still
    /// deliver one last measurement to it.
    pub fn remove_listener<L>(&self, listener: &Arc<L>) -> ControlResult<()>
    where
        L: SensorListener + ?Sized,
    {
        let mut listeners = self.shared.listeners.lock();
        let Some(index) = listeners.iter().position(|l| same_listener(l, listener)) else {
            return Err(ControlError::UnknownListener {
                sensor: self.id().to_owned(),
            });
        };
        listeners.remove(index);
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// Most recent sample, or `None` before the first one is taken.
    pub fn current_signal(&self) -> Option<Measurement> {
        self.shared.latest.read().clone()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.stop_measuring();
        self.registry.release_sensor_id(&self.shared.id);
    }
}
