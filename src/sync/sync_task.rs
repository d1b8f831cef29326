//! Periodic task scheduler.
//!
//! A [`SyncTask`] wraps an [`Updater`] and gives it start/stop/execute-on-demand semantics.
//! Executions of the same task never overlap: concurrent calls to [`SyncTask::execute`] queue up
//! and run in FIFO order after the in-flight one, and periodic ticks go through the same queue.
use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use tokio::{sync::oneshot, task::JoinHandle};

/// Result of a synchronization cycle. Updaters report failures through this value and never
/// return errors, so a failed cycle cannot break the periodic chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum UpdateOutcome {
    #[allow(missing_docs)]
    Success,
    #[allow(missing_docs)]
    Failure,
}

impl UpdateOutcome {
    #[allow(missing_docs)]
    pub fn is_success(self) -> bool {
        self == UpdateOutcome::Success
    }
}

impl From<bool> for UpdateOutcome {
    fn from(value: bool) -> Self {
        if value {
            UpdateOutcome::Success
        } else {
            UpdateOutcome::Failure
        }
    }
}

/// A unit of synchronization work run by a [`SyncTask`].
///
/// Implementations must convert every internal failure into [`UpdateOutcome::Failure`] (and a
/// log record). Panicking is treated as a failure of that single execution.
#[async_trait]
pub trait Updater: Send + Sync + 'static {
    /// Arguments of an execution. Periodic executions reuse the input given to `start`.
    type Input: Clone + Send + Sync + 'static;

    #[allow(missing_docs)]
    async fn update(&self, input: Self::Input) -> UpdateOutcome;
}

struct RunState<I> {
    running: bool,
    /// Bumped on every start, so a timer armed before a stop/start pair does not keep ticking.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    input: Option<I>,
}

struct Inner<U: Updater> {
    name: &'static str,
    updater: U,
    period: Duration,
    jitter: Duration,
    /// Held for the duration of an execution. Tokio mutexes are fair, so waiting executions run
    /// in the order they were requested.
    execution: tokio::sync::Mutex<()>,
    state: Mutex<RunState<U::Input>>,
}

impl<U: Updater> Inner<U> {
    fn lock(&self) -> MutexGuard<'_, RunState<U::Input>> {
        self.state
            .lock()
            .expect("thread holding sync task lock should not panic")
    }

    async fn execute(&self, input: U::Input) -> UpdateOutcome {
        let _execution = self.execution.lock().await;
        log::debug!(target: "splitio", task = self.name; "executing task");
        self.updater.update(input).await
    }
}

/// Scheduler of an [`Updater`]. Cloning returns another handle to the same task.
pub struct SyncTask<U: Updater> {
    inner: Arc<Inner<U>>,
}

impl<U: Updater> Clone for SyncTask<U> {
    fn clone(&self) -> Self {
        SyncTask {
            inner: self.inner.clone(),
        }
    }
}

impl<U: Updater> SyncTask<U> {
    /// Create a stopped task that runs `updater` every `period` once started.
    pub fn new(name: &'static str, updater: U, period: Duration) -> SyncTask<U> {
        SyncTask::with_jitter(name, updater, period, Duration::ZERO)
    }

    /// Like [`SyncTask::new`], subtracting a random duration up to `jitter` from every period.
    pub fn with_jitter(
        name: &'static str,
        updater: U,
        period: Duration,
        jitter: Duration,
    ) -> SyncTask<U> {
        SyncTask {
            inner: Arc::new(Inner {
                name,
                updater,
                period,
                jitter,
                execution: tokio::sync::Mutex::new(()),
                state: Mutex::new(RunState {
                    running: false,
                    generation: 0,
                    timer: None,
                    input: None,
                }),
            }),
        }
    }

    /// The wrapped updater.
    pub fn updater(&self) -> &U {
        &self.inner.updater
    }

    /// Run the updater now. If an execution is in flight, this one runs after it completes.
    pub async fn execute(&self, input: U::Input) -> UpdateOutcome {
        self.inner.execute(input).await
    }

    /// Start periodic execution with `input`, running the first execution immediately.
    ///
    /// Returns a receiver for the outcome of the first execution, or `None` if the task was
    /// already running. Must be called from within a Tokio runtime.
    pub fn start(&self, input: U::Input) -> Option<oneshot::Receiver<UpdateOutcome>> {
        let mut state = self.inner.lock();
        if state.running {
            return None;
        }

        state.running = true;
        state.generation += 1;
        state.input = Some(input.clone());
        log::debug!(
            target: "splitio",
            task = self.inner.name;
            "starting task, running every {:?}", self.inner.period
        );

        let (first_sender, first_receiver) = oneshot::channel();
        state.timer = Some(tokio::spawn(periodic_execute(
            Arc::downgrade(&self.inner),
            state.generation,
            input,
            first_sender,
        )));

        Some(first_receiver)
    }

    /// Stop periodic execution. An in-flight execution is allowed to complete. Idempotent.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.running = false;
        if let Some(timer) = state.timer.take() {
            log::debug!(target: "splitio", task = self.inner.name; "stopping task");
            timer.abort();
        }
    }

    #[allow(missing_docs)]
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Whether an execution is in flight.
    pub fn is_executing(&self) -> bool {
        self.inner.execution.try_lock().is_err()
    }

    /// Input used by periodic executions, if the task was ever started.
    pub fn running_input(&self) -> Option<U::Input> {
        self.inner.lock().input.clone()
    }
}

async fn periodic_execute<U: Updater>(
    inner: Weak<Inner<U>>,
    generation: u64,
    input: U::Input,
    first_sender: oneshot::Sender<UpdateOutcome>,
) {
    let mut first_sender = Some(first_sender);

    loop {
        let Some(task) = inner.upgrade() else {
            return;
        };

        // Executions run in their own Tokio task, so aborting the timer on stop never cancels an
        // in-flight execution.
        let execution = {
            let task = task.clone();
            let input = input.clone();
            tokio::spawn(async move { task.execute(input).await })
        };
        let outcome = match execution.await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!(target: "splitio", task = task.name; "task execution panicked: {:?}", err);
                UpdateOutcome::Failure
            }
        };

        if let Some(sender) = first_sender.take() {
            // Error means nobody is waiting for the first execution.
            let _ = sender.send(outcome);
        }

        let delay = {
            let state = task.lock();
            if !state.running || state.generation != generation {
                return;
            }
            jitter(task.period, task.jitter)
        };

        drop(task);
        tokio::time::sleep(delay).await;
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
