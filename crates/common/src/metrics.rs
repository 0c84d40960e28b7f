use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Timing of one periodic invocation.
#[derive(Debug, Serialize, Clone)]
pub struct CycleResult {
    pub owner: String,
    pub cycle_id: u64,
    /// How late the invocation started relative to its fixed-rate slot.
    pub lateness_ns: i64,
    pub processing_time_ns: u64,
    pub deadline_met: bool,
    pub completed: bool,
}

/// Thread-safe recorder with internal mutability.
/// Cloning shares the same underlying storage.
#[derive(Clone)]
pub struct CycleRecorder {
    results: Arc<Mutex<Vec<CycleResult>>>,
    missed_deadlines: Arc<AtomicUsize>,
}

impl Default for CycleRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleRecorder {
    pub fn new() -> Self {
        Self {
            results: Arc::new(Mutex::new(Vec::with_capacity(10_000))),
            missed_deadlines: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn record(&self, result: CycleResult) {
        if !result.deadline_met {
            self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }
        self.results.lock().push(result);
    }

    pub fn results(&self) -> Vec<CycleResult> {
        self.results.lock().clone()
    }

    pub fn results_for(&self, owner: &str) -> Vec<CycleResult> {
        self.results
            .lock()
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect()
    }

    pub fn missed_deadlines(&self) -> usize {
        self.missed_deadlines.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_to_csv(&self, path: impl AsRef<Path>) -> Result<usize, csv::Error> {
        let data = self.results.lock();
        let mut wtr = csv::Writer::from_path(path.as_ref())?;
        for record in data.iter() {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        tracing::info!(
            "saved {} cycle records to {}",
            data.len(),
            path.as_ref().display()
        );
        Ok(data.len())
    }
}
