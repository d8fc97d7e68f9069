use crate::command::{CancellationFlag, CommandExecutor};
use crate::config::DEFAULT_SHUTDOWN_GRACE;
use crate::model::{Outcome, RunCounters};
use crate::scan::DEFAULT_THROTTLE;
use crate::task::{Emitter, Task, TaskEvent, run_task};
use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const RECV_SLICE: Duration = Duration::from_millis(100);

/// Everything one phase produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseOutcome<R> {
    pub counters: RunCounters,
    pub dispatched: usize,
    pub results: Vec<R>,
    pub cancelled: bool,
}

impl<R> PhaseOutcome<R> {
    fn empty() -> Self {
        Self {
            counters: RunCounters::default(),
            dispatched: 0,
            results: Vec::new(),
            cancelled: false,
        }
    }

    /// Tasks whose terminal result never arrived (cancelled or abandoned after the grace period).
    pub fn unfinished(&self) -> usize {
        self.dispatched.saturating_sub(self.counters.completed)
    }
}

/// Runs tasks on a bounded pool of worker threads.
///
/// Results are funnelled through one channel into the calling thread, which is the only
/// writer of the phase counters.
#[derive(Clone)]
pub struct Scheduler {
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationFlag,
    throttle: usize,
    grace: Duration,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn CommandExecutor>, cancel: CancellationFlag) -> Self {
        Self {
            executor,
            cancel,
            throttle: DEFAULT_THROTTLE,
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_throttle(mut self, throttle: usize) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Runs one task on a helper thread and returns its terminal result, if any.
    pub fn run_single<T, F>(&self, task: T, mut on_event: F) -> Option<T::Output>
    where
        T: Task + 'static,
        F: FnMut(&TaskEvent<T::Output>),
    {
        let (tx, rx) = mpsc::channel();
        let executor = Arc::clone(&self.executor);
        let cancel = self.cancel.clone();
        let label = task.label();
        let spawned = thread::Builder::new()
            .name(format!("sweep-{label}"))
            .spawn(move || {
                let emitter = Emitter::new(tx, cancel.clone());
                run_task(&task, executor.as_ref(), &cancel, &emitter);
            });
        if let Err(err) = spawned {
            warn!(task = %label, error = %err, "failed to start task thread");
            return None;
        }

        let mut grace_deadline = None;
        loop {
            if self.grace_expired(&mut grace_deadline) {
                warn!(task = %label, "task did not settle within the grace period");
                return None;
            }
            match rx.recv_timeout(RECV_SLICE) {
                Ok(TaskEvent::Finished(result)) => return Some(result),
                Ok(event) => on_event(&event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Runs every task with at most `throttle` in flight and aggregates their results.
    ///
    /// `on_event` sees every event in arrival order together with the counters after the
    /// event was applied. Once cancellation is observed the loop waits at most the grace
    /// period for in-flight tasks before giving up on them.
    pub fn run<T, F>(&self, tasks: Vec<T>, mut on_event: F) -> PhaseOutcome<T::Output>
    where
        T: Task + 'static,
        T::Output: Outcome,
        F: FnMut(&TaskEvent<T::Output>, &RunCounters),
    {
        let dispatched = tasks.len();
        if dispatched == 0 {
            return PhaseOutcome::empty();
        }
        let jobs = normalized_jobs(self.throttle, dispatched);
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let (tx, rx) = mpsc::channel::<TaskEvent<T::Output>>();
        for index in 0..jobs {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let executor = Arc::clone(&self.executor);
            let cancel = self.cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("sweep-worker-{index}"))
                .spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let next = match queue.lock() {
                            Ok(mut guard) => guard.pop_front(),
                            Err(_) => None,
                        };
                        let Some(task) = next else {
                            break;
                        };
                        let emitter = Emitter::new(tx.clone(), cancel.clone());
                        run_task(&task, executor.as_ref(), &cancel, &emitter);
                    }
                });
            if let Err(err) = spawned {
                warn!(worker = index, error = %err, "failed to start worker thread");
            }
        }
        drop(tx);
        debug!(dispatched, jobs, "phase started");

        let mut outcome = PhaseOutcome {
            dispatched,
            ..PhaseOutcome::empty()
        };
        let mut grace_deadline = None;
        while outcome.counters.completed < dispatched {
            if self.grace_expired(&mut grace_deadline) {
                warn!(
                    outstanding = dispatched - outcome.counters.completed,
                    "abandoning tasks that did not settle within the grace period"
                );
                break;
            }
            let event = match rx.recv_timeout(RECV_SLICE) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if let TaskEvent::Finished(result) = &event {
                outcome.counters.record(result.status());
            }
            on_event(&event, &outcome.counters);
            if let TaskEvent::Finished(result) = event {
                outcome.results.push(result);
            }
        }
        outcome.cancelled = self.cancel.is_cancelled();
        info!(
            dispatched,
            completed = outcome.counters.completed,
            success = outcome.counters.success,
            failed = outcome.counters.failed,
            skipped = outcome.counters.skipped,
            cancelled = outcome.cancelled,
            "phase finished"
        );
        outcome
    }

    fn grace_expired(&self, deadline: &mut Option<Instant>) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        let deadline = *deadline.get_or_insert_with(|| Instant::now() + self.grace);
        Instant::now() >= deadline
    }
}

pub(crate) fn normalized_jobs(requested_jobs: usize, work_item_count: usize) -> usize {
    requested_jobs.max(1).min(work_item_count.max(1))
}
