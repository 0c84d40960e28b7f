//! Health reporting for failures that happen inside scheduled ticks.
//!
//! Tick failures never cross the scheduling boundary. They are logged,
//! counted and queued here so callers can observe them without touching
//! timer internals.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::LoopId;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TickOrigin {
    Sensor(String),
    Loop(LoopId),
}

impl fmt::Display for TickOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOrigin::Sensor(id) => write!(f, "sensor {id}"),
            TickOrigin::Loop(id) => write!(f, "{id}"),
        }
    }
}

/// Where in the tick the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickStage {
    Sampling,
    Listener,
    NotYetSampled,
    Behaviour,
    Actuator,
    Panic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickFailure {
    pub origin: TickOrigin,
    pub stage: TickStage,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl TickFailure {
    pub fn new(origin: TickOrigin, stage: TickStage, message: impl Into<String>) -> Self {
        Self {
            origin,
            stage,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for TickFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {:?}: {}",
            self.occurred_at.format("%H:%M:%S%.3f"),
            self.origin,
            self.stage,
            self.message
        )
    }
}

/// Shared failure hub. One per registry, handed to every sensor and loop.
pub struct Diagnostics {
    tick_count: AtomicU64,
    failure_count: AtomicU64,
    dropped_count: AtomicU64,
    tx: Sender<TickFailure>,
    rx: Receiver<TickFailure>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Diagnostics {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            tick_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            tx,
            rx,
        }
    }

    pub fn record_tick(&self) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Logs and queues a failure. When the queue is full the oldest report
    /// is discarded; this never blocks the calling tick.
    pub fn report(&self, failure: TickFailure) {
        tracing::warn!(
            origin = %failure.origin,
            stage = ?failure.stage,
            "tick failure: {}",
            failure.message
        );
        self.failure_count.fetch_add(1, Ordering::Relaxed);

        let mut pending = failure;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped_count.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Receiving end of the failure queue. The queue is shared: a report is
    /// delivered to exactly one receiver.
    pub fn receiver(&self) -> Receiver<TickFailure> {
        self.rx.clone()
    }

    /// Takes every failure that is still queued.
    pub fn drain(&self) -> Vec<TickFailure> {
        self.rx.try_iter().collect()
    }
}
