//! Periodic feedback control: sensors sampled on their own schedule, loops
//! that turn the latest sample into an actuator signal, and the registry
//! that keeps sensor and actuator bindings exclusive.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::config::ExperimentConfig;
use common::{ControlError, ControlResult, CycleRecorder, Diagnostics, LoopId, TickFailure};
use tracing::info;

pub mod actuator;
pub mod control_loop;
pub mod registry;
pub mod sensor;
pub mod timer;

pub use actuator::{Actuator, SimulatedActuator};
pub use control_loop::ControlLoop;
pub use registry::{Binding, LoopRegistry};
pub use sensor::{MeasurementLog, Sensor, SensorListener};
pub use timer::{PeriodicTimer, TickStatus};

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked with a non-string payload".to_owned()
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorSummary {
    pub id: String,
    pub adjustments: usize,
    pub last_signal: Option<f64>,
}

pub struct ExperimentReport {
    pub experiment_name: String,
    pub elapsed: Duration,
    pub cycles: CycleRecorder,
    pub completed_ticks: u64,
    pub failure_count: u64,
    pub dropped_failures: u64,
    pub failures: Vec<TickFailure>,
    pub actuators: Vec<ActuatorSummary>,
}

/// Builds every sensor, actuator and loop described by `config`, runs them
/// for `duration_ms` and tears everything down again.
pub fn run_experiment(config: &ExperimentConfig) -> ControlResult<ExperimentReport> {
    config.validate()?;

    let diagnostics = Arc::new(Diagnostics::with_capacity(config.diagnostics_capacity));
    let registry = LoopRegistry::with_diagnostics(diagnostics.clone());
    let recorder = CycleRecorder::new();

    let mut sensors = HashMap::new();
    for sc in &config.sensors {
        let mut sensor = Sensor::new(
            &registry,
            sc.id.clone(),
            Duration::from_millis(sc.sampling_period_ms),
            sc.unit,
            sc.strategy.build()?,
        )?;
        if config.record_cycles {
            sensor = sensor.with_recorder(recorder.clone());
        }
        sensors.insert(sc.id.clone(), Arc::new(sensor));
    }

    let mut actuators = Vec::with_capacity(config.actuators.len());
    for ac in &config.actuators {
        actuators.push(Arc::new(
            SimulatedActuator::new(ac.id.clone()).with_limits(ac.min, ac.max),
        ));
    }

    let mut loops = Vec::with_capacity(config.loops.len());
    for lc in &config.loops {
        let sensor = sensors
            .get(&lc.sensor)
            .cloned()
            .ok_or_else(|| ControlError::UnknownComponent {
                kind: "sensor",
                id: lc.sensor.clone(),
            })?;
        let actuator = actuators
            .iter()
            .find(|a| a.id() == lc.actuator)
            .cloned()
            .ok_or_else(|| ControlError::UnknownComponent {
                kind: "actuator",
                id: lc.actuator.clone(),
            })?;
        let update_period = Duration::from_millis(lc.update_period_ms);
        let mut control_loop = ControlLoop::new(
            &registry,
            LoopId(lc.id),
            sensor,
            actuator,
            lc.setpoint,
            update_period,
            lc.behaviour.build(update_period.as_secs_f64()),
        )?;
        if config.record_cycles {
            control_loop = control_loop.with_recorder(recorder.clone());
        }
        loops.push(control_loop);
    }

    info!(
        experiment = %config.experiment_name,
        sensors = sensors.len(),
        loops = loops.len(),
        "starting experiment"
    );
    let started = Instant::now();
    for sensor in sensors.values() {
        sensor.start_measuring()?;
    }
    for control_loop in &loops {
        control_loop.start_controlling()?;
    }

    thread::sleep(Duration::from_millis(config.duration_ms));

    for control_loop in &loops {
        control_loop.stop_controlling();
    }
    for sensor in sensors.values() {
        sensor.stop_measuring();
    }
    let elapsed = started.elapsed();
    drop(loops);

    let mut summaries: Vec<ActuatorSummary> = actuators
        .iter()
        .map(|a| ActuatorSummary {
            id: a.id().to_owned(),
            adjustments: a.adjustments(),
            last_signal: a.last_signal(),
        })
        .collect();
    summaries.sort_by(|a, b| a.id.cmp(&b.id));

    info!(experiment = %config.experiment_name, ?elapsed, "experiment finished");
    Ok(ExperimentReport {
        experiment_name: config.experiment_name.clone(),
        elapsed,
        cycles: recorder,
        completed_ticks: diagnostics.tick_count(),
        failure_count: diagnostics.failure_count(),
        dropped_failures: diagnostics.dropped_count(),
        failures: diagnostics.drain(),
        actuators: summaries,
    })
}
