use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::behaviour::{ControlBehaviour, OnOffBehaviour, PidBehaviour, ProportionalBehaviour};
use crate::error::ConfigError;
use crate::pid::PidGains;
use crate::sampling::{ConstantSampling, RandomSampling, SamplingStrategy, SineSampling};
use crate::MeasurementUnit;

fn default_capacity() -> usize {
    crate::diagnostics::DEFAULT_CAPACITY
}

/// A complete system: sensors, actuators and the loops binding them.
#[derive(Debug, Deserialize, Clone)]
pub struct ExperimentConfig {
    pub experiment_name: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub record_cycles: bool,
    #[serde(default = "default_capacity")]
    pub diagnostics_capacity: usize,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub actuators: Vec<ActuatorConfig>,
    #[serde(default)]
    pub loops: Vec<LoopConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    pub id: String,
    pub sampling_period_ms: u64,
    pub unit: MeasurementUnit,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActuatorConfig {
    pub id: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoopConfig {
    pub id: u32,
    pub sensor: String,
    pub actuator: String,
    pub setpoint: f64,
    pub update_period_ms: u64,
    pub behaviour: BehaviourConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Constant { quantity: f64 },
    Random { min: f64, max: f64 },
    Sine { offset: f64, amplitude: f64 },
}

impl StrategyConfig {
    pub fn build(&self) -> Result<Arc<dyn SamplingStrategy>, ConfigError> {
        Ok(match *self {
            StrategyConfig::Constant { quantity } => Arc::new(ConstantSampling::new(quantity)),
            StrategyConfig::Random { min, max } => Arc::new(
                RandomSampling::new(min, max).map_err(|e| ConfigError::Invalid {
                    what: e.to_string(),
                })?,
            ),
            StrategyConfig::Sine { offset, amplitude } => {
                Arc::new(SineSampling::new(offset, amplitude))
            }
        })
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BehaviourConfig {
    Proportional {
        gain: f64,
    },
    Pid {
        kp: f64,
        ki: f64,
        kd: f64,
        integral_limit: Option<f64>,
    },
    OnOff {
        on_output: f64,
        off_output: f64,
        #[serde(default)]
        hysteresis: f64,
    },
}

impl BehaviourConfig {
    /// `dt_secs` is the owning loop's update period; only PID uses it.
    pub fn build(&self, dt_secs: f64) -> Arc<dyn ControlBehaviour> {
        match *self {
            BehaviourConfig::Proportional { gain } => Arc::new(ProportionalBehaviour::new(gain)),
            BehaviourConfig::Pid {
                kp,
                ki,
                kd,
                integral_limit,
            } => {
                let pid = PidBehaviour::new(PidGains { kp, ki, kd }, dt_secs);
                match integral_limit {
                    Some(limit) => Arc::new(pid.with_integral_limit(limit)),
                    None => Arc::new(pid),
                }
            }
            BehaviourConfig::OnOff {
                on_output,
                off_output,
                hysteresis,
            } => Arc::new(OnOffBehaviour::new(on_output, off_output, hysteresis)),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<ExperimentConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ExperimentConfig::from_toml_str(&content)
}

fn invalid(what: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { what: what.into() }
}

impl ExperimentConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ExperimentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_ms == 0 {
            return Err(invalid("duration_ms must be greater than zero"));
        }

        let mut sensor_ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.trim().is_empty() {
                return Err(invalid("sensor id must not be empty"));
            }
            if sensor.sampling_period_ms == 0 {
                return Err(invalid(format!("sensor {} has a zero sampling period", sensor.id)));
            }
            if !sensor_ids.insert(sensor.id.as_str()) {
                return Err(invalid(format!("sensor {} is declared twice", sensor.id)));
            }
        }

        let mut actuator_ids = HashSet::new();
        for actuator in &self.actuators {
            if actuator.id.trim().is_empty() {
                return Err(invalid("actuator id must not be empty"));
            }
            if let (Some(min), Some(max)) = (actuator.min, actuator.max) {
                if min > max {
                    return Err(invalid(format!("actuator {} has min > max", actuator.id)));
                }
            }
            if !actuator_ids.insert(actuator.id.as_str()) {
                return Err(invalid(format!("actuator {} is declared twice", actuator.id)));
            }
        }

        let mut loop_ids = HashSet::new();
        for control_loop in &self.loops {
            if control_loop.update_period_ms == 0 {
                return Err(invalid(format!(
                    "loop {} has a zero update period",
                    control_loop.id
                )));
            }
            if !loop_ids.insert(control_loop.id) {
                return Err(invalid(format!("loop {} is declared twice", control_loop.id)));
            }
            if !sensor_ids.contains(control_loop.sensor.as_str()) {
                return Err(invalid(format!(
                    "loop {} refers to unknown sensor {}",
                    control_loop.id, control_loop.sensor
                )));
            }
            if !actuator_ids.contains(control_loop.actuator.as_str()) {
                return Err(invalid(format!(
                    "loop {} refers to unknown actuator {}",
                    control_loop.id, control_loop.actuator
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THERMOSTAT: &str = r#"
        experiment_name = "thermostat"
        duration_ms = 200
        record_cycles = true

        [[sensors]]
        id = "s1"
        sampling_period_ms = 50
        unit = "celsius"
        strategy = { kind = "constant", quantity = 21.5 }

        [[actuators]]
        id = "a1"

        [[loops]]
        id = 1
        sensor = "s1"
        actuator = "a1"
        setpoint = 22.0
        update_period_ms = 50
        behaviour = { kind = "proportional", gain = 2.0 }
    "#;

    #[test]
    fn parses_thermostat_experiment() {
        let config = ExperimentConfig::from_toml_str(THERMOSTAT).unwrap();
        assert_eq!(config.experiment_name, "thermostat");
        assert_eq!(config.diagnostics_capacity, crate::diagnostics::DEFAULT_CAPACITY);
        assert_eq!(config.sensors[0].unit, MeasurementUnit::Celsius);
        assert_eq!(
            config.sensors[0].strategy,
            StrategyConfig::Constant { quantity: 21.5 }
        );
        assert_eq!(
            config.loops[0].behaviour,
            BehaviourConfig::Proportional { gain: 2.0 }
        );

        let behaviour = config.loops[0].behaviour.build(0.05);
        assert_eq!(behaviour.compute(22.0, 21.5).unwrap(), 1.0);
    }

    #[test]
    fn rejects_dangling_sensor_reference() {
        let broken = THERMOSTAT.replace("sensor = \"s1\"", "sensor = \"s9\"");
        let err = ExperimentConfig::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("unknown sensor s9"));
    }

    #[test]
    fn rejects_zero_period() {
        let broken = THERMOSTAT.replace("sampling_period_ms = 50", "sampling_period_ms = 0");
        assert!(matches!(
            ExperimentConfig::from_toml_str(&broken),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn reports_parse_errors() {
        assert!(matches!(
            ExperimentConfig::from_toml_str("experiment_name = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn random_strategy_with_empty_range_is_invalid() {
        let strategy = StrategyConfig::Random { min: 2.0, max: 1.0 };
        assert!(strategy.build().is_err());
    }

    #[test]
    fn random_strategy_with_overflowing_range_is_invalid() {
        let strategy = StrategyConfig::Random {
            min: -1e308,
            max: 1e308,
        };
        assert!(matches!(strategy.build(), Err(ConfigError::Invalid { .. })));
    }
}
