//! Feedback loops binding one sensor to one actuator.
//!
//! Every tick reads the sensor's latest sample, runs the active behaviour
//! against the setpoint and applies the result to the actuator. The whole
//! read-compute-apply cycle runs under the loop's lock, the same lock that
//! setpoint and behaviour updates take, so a tick always sees one
//! consistent (setpoint, behaviour) pair.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use common::{
    ControlBehaviour, ControlError, ControlResult, CycleRecorder, Diagnostics, LoopId,
    TickFailure, TickOrigin, TickStage,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::actuator::Actuator;
use crate::panic_message;
use crate::registry::LoopRegistry;
use crate::sensor::Sensor;
use crate::timer::{PeriodicTimer, TickStatus};

struct LoopState {
    setpoint: f64,
    behaviour: Arc<dyn ControlBehaviour>,
    last_output: Option<f64>,
}

struct Core {
    id: LoopId,
    sensor: Arc<Sensor>,
    actuator: Arc<dyn Actuator>,
    state: Mutex<LoopState>,
    diagnostics: Arc<Diagnostics>,
}

impl Core {
    fn report(&self, stage: TickStage, message: impl Into<String>) {
        self.diagnostics
            .report(TickFailure::new(TickOrigin::Loop(self.id), stage, message));
    }

    fn update_manipulated_variable(&self) -> TickStatus {
        let mut state = self.state.lock();

        let Some(measurement) = self.sensor.current_signal() else {
            self.report(
                TickStage::NotYetSampled,
                format!("sensor {} has not been sampled yet", self.sensor.id()),
            );
            return TickStatus::Failed;
        };

        let setpoint = state.setpoint;
        let behaviour = &state.behaviour;
        let computed = panic::catch_unwind(AssertUnwindSafe(|| {
            behaviour.compute(setpoint, measurement.quantity())
        }));
        let output = match computed {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                self.report(TickStage::Behaviour, err.to_string());
                return TickStatus::Failed;
            }
            Err(payload) => {
                self.report(TickStage::Panic, panic_message(payload.as_ref()));
                return TickStatus::Failed;
            }
        };

        let applied =
            panic::catch_unwind(AssertUnwindSafe(|| self.actuator.adjust_signal(output)));
        match applied {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.report(TickStage::Actuator, err.to_string());
                return TickStatus::Failed;
            }
            Err(payload) => {
                self.report(TickStage::Panic, panic_message(payload.as_ref()));
                return TickStatus::Failed;
            }
        }

        state.last_output = Some(output);
        self.diagnostics.record_tick();
        TickStatus::Completed
    }
}

pub struct ControlLoop {
    core: Arc<Core>,
    update_period: Duration,
    registry: Arc<LoopRegistry>,
    recorder: Option<CycleRecorder>,
    // Serializes start/stop; held across the worker join.
    lifecycle: Mutex<()>,
    // Only ever locked briefly.
    timer: Mutex<Option<PeriodicTimer>>,
}

impl ControlLoop {
    /// Binds `sensor` and `actuator` to a new loop.
    ///
    /// Fails with [`ControlError::DuplicateBinding`] when either endpoint
    /// already belongs to a live loop. The binding is released when the
    /// loop is dropped; stopping the loop keeps it.
    pub fn new(
        registry: &Arc<LoopRegistry>,
        id: LoopId,
        sensor: Arc<Sensor>,
        actuator: Arc<dyn Actuator>,
        setpoint: f64,
        update_period: Duration,
        behaviour: Arc<dyn ControlBehaviour>,
    ) -> ControlResult<Self> {
        if update_period.is_zero() {
            return Err(ControlError::InvalidPeriod {
                owner: id.to_string(),
            });
        }
        registry.register(id, sensor.id(), actuator.id())?;

        let control_loop = Self {
            core: Arc::new(Core {
                id,
                sensor,
                actuator,
                state: Mutex::new(LoopState {
                    setpoint,
                    behaviour,
                    last_output: None,
                }),
                diagnostics: registry.diagnostics().clone(),
            }),
            update_period,
            registry: registry.clone(),
            recorder: None,
            lifecycle: Mutex::new(()),
            timer: Mutex::new(None),
        };
        info!("{} was successfully created", control_loop);
        Ok(control_loop)
    }

    pub fn with_recorder(mut self, recorder: CycleRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn id(&self) -> LoopId {
        self.core.id
    }

    pub fn sensor(&self) -> &Arc<Sensor> {
        &self.core.sensor
    }

    pub fn actuator(&self) -> &Arc<dyn Actuator> {
        &self.core.actuator
    }

    pub fn update_period(&self) -> Duration {
        self.update_period
    }

    /// Starts the periodic cycle. A no-op while already controlling; after
    /// `stop_controlling` it resumes on a fresh schedule.
    pub fn start_controlling(&self) -> ControlResult<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.timer.lock().is_some() {
            return Ok(());
        }

        let core = self.core.clone();
        let mut timer = PeriodicTimer::new(self.to_string(), self.update_period, move || {
            core.update_manipulated_variable()
        })?;
        if let Some(recorder) = &self.recorder {
            timer = timer.with_recorder(recorder.clone());
        }
        let mut slot = self.timer.lock();
        timer.start()?;
        *slot = Some(timer);
        drop(slot);
        debug!(control_loop = %self, "controlling started");
        Ok(())
    }

    /// Stops the periodic cycle. Once this returns the actuator receives no
    /// further signal from this loop.
    pub fn stop_controlling(&self) {
        let _lifecycle = self.lifecycle.lock();
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.stop();
            debug!(control_loop = %self, "controlling stopped");
        }
    }

    pub fn is_controlling(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Replaces the setpoint and returns the previous one.
    pub fn update_set_point(&self, new_set_point: f64) -> f64 {
        let old = {
            let mut state = self.core.state.lock();
            std::mem::replace(&mut state.setpoint, new_set_point)
        };
        info!("Set point updated from {} to {} for {}", old, new_set_point, self);
        old
    }

    /// Replaces the control behaviour and returns the previous one.
    pub fn switch_control_behaviour(
        &self,
        new_behaviour: Arc<dyn ControlBehaviour>,
    ) -> Arc<dyn ControlBehaviour> {
        let new_name = new_behaviour.name().to_owned();
        let old = {
            let mut state = self.core.state.lock();
            std::mem::replace(&mut state.behaviour, new_behaviour)
        };
        info!(
            "Control behaviour switched from {} to {} on {}",
            old.name(),
            new_name,
            self
        );
        old
    }

    /// Replaces setpoint and behaviour together; no tick observes one
    /// without the other.
    pub fn reconfigure(&self, set_point: f64, behaviour: Arc<dyn ControlBehaviour>) {
        let new_name = behaviour.name().to_owned();
        let (old_set_point, old_behaviour) = {
            let mut state = self.core.state.lock();
            (
                std::mem::replace(&mut state.setpoint, set_point),
                std::mem::replace(&mut state.behaviour, behaviour),
            )
        };
        info!(
            "{} reconfigured from ({}, {}) to ({}, {})",
            self,
            old_set_point,
            old_behaviour.name(),
            set_point,
            new_name
        );
    }

    pub fn set_point(&self) -> f64 {
        self.core.state.lock().setpoint
    }

    pub fn behaviour_name(&self) -> String {
        self.core.state.lock().behaviour.name().to_owned()
    }

    /// Output applied by the most recent successful tick.
    pub fn last_output(&self) -> Option<f64> {
        self.core.state.lock().last_output
    }
}

impl fmt::Display for ControlLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.core.id, f)
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.stop_controlling();
        self.registry.unregister(self.core.id);
        debug!(control_loop = %self.core.id, "control loop released");
    }
}
