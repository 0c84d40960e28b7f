//! Fixed-rate periodic task runner.
//!
//! Each [`PeriodicTimer`] owns one dedicated worker thread. The bound task
//! runs immediately on `start()` and then at `origin + k * period`. Runs of
//! the same timer never overlap: when one overruns its slot the next starts
//! as soon as it returns, and the schedule catches up from the same origin.
//!
//! A timer is single use. Once stopped it cannot be started again; build a
//! new one instead.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use common::{ControlError, ControlResult, CycleRecorder, CycleResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

/// Whether a tick finished its work or had to give up part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Completed,
    Failed,
}

pub type Task = Box<dyn FnMut() -> TickStatus + Send + 'static>;

enum TimerState {
    Idle(Task),
    Running {
        stop_tx: Sender<()>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

pub struct PeriodicTimer {
    name: String,
    period: Duration,
    recorder: Option<CycleRecorder>,
    state: Mutex<TimerState>,
}

impl PeriodicTimer {
    pub fn new(
        name: impl Into<String>,
        period: Duration,
        task: impl FnMut() -> TickStatus + Send + 'static,
    ) -> ControlResult<Self> {
        let name = name.into();
        if period.is_zero() {
            return Err(ControlError::InvalidPeriod { owner: name });
        }
        Ok(Self {
            name,
            period,
            recorder: None,
            state: Mutex::new(TimerState::Idle(Box::new(task))),
        })
    }

    /// Records the timing of every invocation into `recorder`.
    pub fn with_recorder(mut self, recorder: CycleRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), TimerState::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.state.lock(), TimerState::Stopped)
    }

    /// Starts the worker. A no-op when already running; fails with
    /// [`ControlError::TimerStopped`] once the timer has been stopped.
    ///
    /// When the worker thread cannot be spawned the timer stays idle and
    /// `start` may be retried.
    pub fn start(&self) -> ControlResult<()> {
        self.start_with(|builder, run| builder.spawn(run))
    }

    fn start_with<S>(&self, spawn: S) -> ControlResult<()>
    where
        S: FnOnce(thread::Builder, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        let mut state = self.state.lock();
        let task = match std::mem::replace(&mut *state, TimerState::Stopped) {
            TimerState::Idle(task) => task,
            running @ TimerState::Running { .. } => {
                *state = running;
                return Ok(());
            }
            TimerState::Stopped => {
                return Err(ControlError::TimerStopped {
                    name: self.name.clone(),
                })
            }
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        // Taken back out if the thread never starts.
        let pending = Arc::new(Mutex::new(Some(Worker {
            name: self.name.clone(),
            period: self.period,
            recorder: self.recorder.clone(),
            stop_rx,
            task,
        })));
        let slot = pending.clone();
        let spawned = spawn(
            thread::Builder::new().name(self.name.clone()),
            Box::new(move || {
                let worker = slot.lock().take();
                if let Some(worker) = worker {
                    worker.run();
                }
            }),
        );

        match spawned {
            Ok(handle) => {
                debug!(timer = %self.name, period = ?self.period, "timer started");
                *state = TimerState::Running { stop_tx, handle };
                Ok(())
            }
            Err(source) => {
                let worker = pending.lock().take();
                if let Some(worker) = worker {
                    *state = TimerState::Idle(worker.task);
                }
                error!(timer = %self.name, %source, "failed to spawn timer worker");
                Err(ControlError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Cancels future invocations and waits for an in-flight one to finish.
    ///
    /// Safe to call repeatedly and from any thread. When called from the
    /// timer's own task it returns without waiting; no further invocation
    /// begins after the current one.
    pub fn stop(&self) {
        if let Some(handle) = self.cancel() {
            join_worker(&self.name, handle);
        }
    }

    /// Signals the worker to stop and hands back its thread without waiting.
    /// Returns `None` unless the timer was running.
    pub fn cancel(&self) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        if !matches!(*state, TimerState::Running { .. }) {
            return None;
        }
        match std::mem::replace(&mut *state, TimerState::Stopped) {
            TimerState::Running { stop_tx, handle } => {
                // Dropping the sender disconnects the worker even if the send fails.
                let _ = stop_tx.try_send(());
                Some(handle)
            }
            _ => None,
        }
    }
}

/// Waits for a cancelled worker. Returns at once when called from that
/// worker's own thread.
fn join_worker(name: &str, handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        debug!(timer = name, "timer stopped from its own task");
        return;
    }
    if handle.join().is_err() {
        error!(timer = name, "timer worker terminated abnormally");
    }
    debug!(timer = name, "timer stopped");
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    name: String,
    period: Duration,
    recorder: Option<CycleRecorder>,
    stop_rx: Receiver<()>,
    task: Task,
}

impl Worker {
    fn run(mut self) {
        let mut scheduled = Instant::now();
        let mut cycle: u64 = 0;

        loop {
            self.tick(cycle, scheduled);
            cycle += 1;
            scheduled += self.period;

            // Checked first so a stop request wins over a backlog of overdue slots.
            if self.stop_requested() {
                break;
            }
            match self.stop_rx.recv_deadline(scheduled) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(
            self.stop_rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Empty)
        )
    }

    fn tick(&mut self, cycle: u64, scheduled: Instant) {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.task)()));
        let status = match outcome {
            Ok(status) => status,
            Err(_) => {
                error!(timer = %self.name, cycle, "task panicked; continuing with next period");
                TickStatus::Failed
            }
        };

        if let Some(recorder) = &self.recorder {
            let processing = started.elapsed();
            let lateness_ns = if started >= scheduled {
                started.duration_since(scheduled).as_nanos() as i64
            } else {
                -(scheduled.duration_since(started).as_nanos() as i64)
            };
            recorder.record(CycleResult {
                owner: self.name.clone(),
                cycle_id: cycle,
                lateness_ns,
                processing_time_ns: processing.as_nanos() as u64,
                deadline_met: processing <= self.period,
                completed: status == TickStatus::Completed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn counting_timer(period_ms: u64) -> (PeriodicTimer, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let timer = PeriodicTimer::new("counter", Duration::from_millis(period_ms), move || {
            c.fetch_add(1, Ordering::SeqCst);
            TickStatus::Completed
        })
        .unwrap();
        (timer, count)
    }

    #[test]
    fn zero_period_is_rejected() {
        let result = PeriodicTimer::new("bad", Duration::ZERO, || TickStatus::Completed);
        assert!(matches!(result, Err(ControlError::InvalidPeriod { .. })));
    }

    #[test]
    fn first_run_is_immediate() {
        let (timer, count) = counting_timer(1_000);
        timer.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        timer.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_at_fixed_rate() {
        let (timer, count) = counting_timer(20);
        timer.start().unwrap();
        thread::sleep(Duration::from_millis(210));
        timer.stop();
        let runs = count.load(Ordering::SeqCst);
        assert!((8..=13).contains(&runs), "unexpected run count {runs}");
    }

    #[test]
    fn start_is_idempotent() {
        let (timer, count) = counting_timer(1_000);
        timer.start().unwrap();
        timer.start().unwrap();
        assert!(timer.is_running());
        thread::sleep(Duration::from_millis(50));
        timer.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restart_after_stop_is_rejected() {
        let (timer, _count) = counting_timer(10);
        timer.start().unwrap();
        timer.stop();
        timer.stop();
        assert!(timer.is_stopped());
        assert!(matches!(
            timer.start(),
            Err(ControlError::TimerStopped { .. })
        ));
    }

    #[test]
    fn failed_spawn_leaves_timer_startable() {
        let (timer, count) = counting_timer(10);
        let result = timer.start_with(|_, _| {
            Err(io::Error::new(io::ErrorKind::Other, "thread limit reached"))
        });
        assert!(matches!(result, Err(ControlError::Spawn { .. })));
        assert!(!timer.is_running());
        assert!(!timer.is_stopped());

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(25));
        timer.stop();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn cancel_hands_back_the_worker() {
        let (timer, count) = counting_timer(5);
        assert!(timer.cancel().is_none());
        timer.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let handle = timer.cancel().unwrap();
        assert!(timer.is_stopped());
        assert!(timer.cancel().is_none());
        handle.join().unwrap();
        let after_join = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_join);
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let (timer, count) = counting_timer(10);
        timer.stop();
        assert!(!timer.is_stopped());
        timer.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        timer.stop();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn no_runs_after_stop_returns() {
        let (timer, count) = counting_timer(5);
        timer.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        timer.stop();
        let after_stop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn overruns_never_overlap() {
        let busy = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicU32::new(0));
        let (b, o, r) = (busy.clone(), overlapped.clone(), runs.clone());
        let timer = PeriodicTimer::new("slow", Duration::from_millis(5), move || {
            if b.swap(true, Ordering::SeqCst) {
                o.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(15));
            r.fetch_add(1, Ordering::SeqCst);
            b.store(false, Ordering::SeqCst);
            TickStatus::Completed
        })
        .unwrap();

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        timer.stop();
        assert!(!overlapped.load(Ordering::SeqCst));
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn panicking_task_keeps_schedule() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let timer = PeriodicTimer::new("panicky", Duration::from_millis(10), move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
            TickStatus::Completed
        })
        .unwrap();

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(60));
        timer.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn stop_from_inside_task_does_not_deadlock() {
        let slot: Arc<Mutex<Option<Arc<PeriodicTimer>>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicU32::new(0));
        let (s, c) = (slot.clone(), count.clone());
        let timer = Arc::new(
            PeriodicTimer::new("self-stopping", Duration::from_millis(5), move || {
                if c.fetch_add(1, Ordering::SeqCst) == 2 {
                    if let Some(timer) = s.lock().as_ref() {
                        timer.stop();
                    }
                }
                TickStatus::Completed
            })
            .unwrap(),
        );
        *slot.lock() = Some(timer.clone());

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(60));
        assert!(timer.is_stopped());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        slot.lock().take();
    }

    #[test]
    fn recorder_captures_each_cycle() {
        let recorder = CycleRecorder::new();
        let timer = PeriodicTimer::new("recorded", Duration::from_millis(10), || {
            TickStatus::Failed
        })
        .unwrap()
        .with_recorder(recorder.clone());

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(45));
        timer.stop();

        let results = recorder.results_for("recorded");
        assert!(results.len() >= 3);
        assert_eq!(results[0].cycle_id, 0);
        assert!(results.iter().all(|r| !r.completed));
    }
}
