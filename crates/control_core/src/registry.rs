//! Bookkeeping for identifiers and loop bindings.
//!
//! A [`LoopRegistry`] is created once per application (or per test) and
//! passed to every sensor and loop constructor. It enforces:
//! - sensor identifiers are unique while the sensor is alive
//! - loop identifiers are unique while the loop is alive
//! - a sensor and an actuator each belong to at most one live loop
//!
//! Every check-and-insert happens under a single lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::{ControlError, ControlResult, Diagnostics, LoopId};
use parking_lot::Mutex;
use tracing::debug;

/// The sensor and actuator a loop governs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub sensor: String,
    pub actuator: String,
}

#[derive(Default)]
struct Tables {
    sensor_ids: HashSet<String>,
    bindings: HashMap<LoopId, Binding>,
    bound_sensors: HashMap<String, LoopId>,
    bound_actuators: HashMap<String, LoopId>,
}

pub struct LoopRegistry {
    tables: Mutex<Tables>,
    diagnostics: Arc<Diagnostics>,
}

impl LoopRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_diagnostics(Arc::new(Diagnostics::default()))
    }

    pub fn with_diagnostics(diagnostics: Arc<Diagnostics>) -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(Tables::default()),
            diagnostics,
        })
    }

    /// Failure hub shared by everything built against this registry.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn register_sensor_id(&self, id: &str) -> ControlResult<()> {
        let mut tables = self.tables.lock();
        if !tables.sensor_ids.insert(id.to_owned()) {
            return Err(ControlError::DuplicateIdentifier {
                kind: "sensor",
                id: id.to_owned(),
            });
        }
        debug!(sensor = id, "sensor id registered");
        Ok(())
    }

    pub fn release_sensor_id(&self, id: &str) -> bool {
        self.tables.lock().sensor_ids.remove(id)
    }

    pub fn is_sensor_registered(&self, id: &str) -> bool {
        self.tables.lock().sensor_ids.contains(id)
    }

    /// Records `loop_id` as the owner of `sensor` and `actuator`.
    ///
    /// Nothing is recorded when any check fails.
    pub fn register(&self, loop_id: LoopId, sensor: &str, actuator: &str) -> ControlResult<()> {
        let mut tables = self.tables.lock();
        if tables.bindings.contains_key(&loop_id) {
            return Err(ControlError::DuplicateIdentifier {
                kind: "control loop",
                id: loop_id.0.to_string(),
            });
        }
        if let Some(&owner) = tables.bound_sensors.get(sensor) {
            return Err(ControlError::DuplicateBinding {
                endpoint: "sensor",
                id: sensor.to_owned(),
                bound_to: owner,
            });
        }
        if let Some(&owner) = tables.bound_actuators.get(actuator) {
            return Err(ControlError::DuplicateBinding {
                endpoint: "actuator",
                id: actuator.to_owned(),
                bound_to: owner,
            });
        }

        tables.bound_sensors.insert(sensor.to_owned(), loop_id);
        tables.bound_actuators.insert(actuator.to_owned(), loop_id);
        tables.bindings.insert(
            loop_id,
            Binding {
                sensor: sensor.to_owned(),
                actuator: actuator.to_owned(),
            },
        );
        debug!(%loop_id, sensor, actuator, "binding registered");
        Ok(())
    }

    /// Releases both endpoints of `loop_id`. Returns the released binding.
    pub fn unregister(&self, loop_id: LoopId) -> Option<Binding> {
        let mut tables = self.tables.lock();
        let binding = tables.bindings.remove(&loop_id)?;
        tables.bound_sensors.remove(&binding.sensor);
        tables.bound_actuators.remove(&binding.actuator);
        debug!(%loop_id, "binding released");
        Some(binding)
    }

    pub fn binding(&self, loop_id: LoopId) -> Option<Binding> {
        self.tables.lock().bindings.get(&loop_id).cloned()
    }

    pub fn loop_for_sensor(&self, sensor: &str) -> Option<LoopId> {
        self.tables.lock().bound_sensors.get(sensor).copied()
    }

    pub fn loop_for_actuator(&self, actuator: &str) -> Option<LoopId> {
        self.tables.lock().bound_actuators.get(actuator).copied()
    }

    pub fn active_loops(&self) -> Vec<LoopId> {
        let mut ids: Vec<_> = self.tables.lock().bindings.keys().copied().collect();
        ids.sort();
        ids
    }
}
