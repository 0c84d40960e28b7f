use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub mod behaviour;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod pid;
pub mod sampling;

pub use behaviour::ControlBehaviour;
pub use config::ExperimentConfig;
pub use diagnostics::{Diagnostics, TickFailure, TickOrigin, TickStage};
pub use error::{ComponentError, ConfigError, ControlError, ControlResult};
pub use metrics::{CycleRecorder, CycleResult};
pub use sampling::SamplingStrategy;

/// Physical unit a sensor reports its quantity in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Pascal,
    Bar,
    Percent,
    LitresPerMinute,
    Metre,
    Volt,
    Dimensionless,
}

impl MeasurementUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            MeasurementUnit::Celsius => "°C",
            MeasurementUnit::Fahrenheit => "°F",
            MeasurementUnit::Kelvin => "K",
            MeasurementUnit::Pascal => "Pa",
            MeasurementUnit::Bar => "bar",
            MeasurementUnit::Percent => "%",
            MeasurementUnit::LitresPerMinute => "L/min",
            MeasurementUnit::Metre => "m",
            MeasurementUnit::Volt => "V",
            MeasurementUnit::Dimensionless => "",
        }
    }
}

impl fmt::Display for MeasurementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One sample taken by a sensor. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    sensor_id: String,
    quantity: f64,
    unit: MeasurementUnit,
    timestamp: DateTime<FixedOffset>,
}

impl Measurement {
    pub fn new(
        sensor_id: impl Into<String>,
        quantity: f64,
        unit: MeasurementUnit,
        timestamp: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            quantity,
            unit,
            timestamp,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit(&self) -> MeasurementUnit {
        self.unit
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{} @ {}",
            self.sensor_id,
            self.quantity,
            self.unit,
            self.timestamp.to_rfc3339()
        )
    }
}

/// Identifier of a control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlLoop{}", self.0)
    }
}
