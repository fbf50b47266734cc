//! Bounded-parallelism processing stages.
//!
//! A [`Stage`] pulls items from an unbounded input queue, runs a unit of work on
//! each one with at most `N` running at a time, and routes every output to the
//! first linked [`Target`] whose predicate accepts it.
//!
//! Lifecycle:
//! - **Running** - items are pulled and processed
//! - **Completing** - input closed; in-flight work is draining
//! - **Faulting** - a unit of work failed; intake stopped, in-flight work is draining
//! - **Completed** / **Faulted** / **Cancelled** - terminal
//!
//! When a stage finishes it forwards the outcome to its link targets: `complete()`
//! after a clean (or cancelled) run, `fault()` with the collected faults otherwise.
//! Units of work are expected to handle per-item failures themselves; an `Err`
//! or panic escaping one is fatal to the stage.

mod target;


pub use target::{DiscardSink, FlattenTarget, Target};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Parallelism;
use crate::error::Error;

/// Unit of work run by a stage for each item
pub type WorkFn<T, U> = Arc<dyn Fn(T) -> BoxFuture<'static, crate::Result<U>> + Send + Sync>;

type Predicate<U> = Box<dyn Fn(&U) -> bool + Send + Sync>;

/// A failure that escaped a unit of work
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageFault {
    /// The unit of work returned an error
    #[error("stage {stage}: {message}")]
    Work {
        /// Stage that faulted
        stage: String,
        /// Error description
        message: String,
    },

    /// The unit of work panicked
    #[error("stage {stage}: worker panicked: {message}")]
    Panicked {
        /// Stage that faulted
        stage: String,
        /// Panic payload, when it was a string
        message: String,
    },
}

impl StageFault {
    /// Name of the stage the fault originated in
    pub fn stage(&self) -> &str {
        match self {
            StageFault::Work { stage, .. } | StageFault::Panicked { stage, .. } => stage,
        }
    }
}

/// Why [`Stage::await_completion`] did not succeed
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    /// One or more faults, including any forwarded from upstream
    #[error("stage faulted with {} error(s)", .0.len())]
    Faulted(Vec<StageFault>),

    /// The shared cancellation token fired
    #[error("stage cancelled")]
    Cancelled,
}

/// Observable lifecycle state of a stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    /// Accepting and processing items
    Running,
    /// Input closed, draining in-flight work
    Completing,
    /// A fault stopped intake, draining in-flight work
    Faulting,
    /// Finished cleanly
    Completed,
    /// Finished with faults
    Faulted,
    /// Stopped by cancellation
    Cancelled,
}

impl StageState {
    /// Whether the stage has finished
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Completed | StageState::Faulted | StageState::Cancelled
        )
    }
}

/// Item counts for a stage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Items accepted by `submit`
    pub submitted: u64,
    /// Units of work that ran to completion (successfully or not)
    pub processed: u64,
    /// Outputs no link accepted
    pub unrouted: u64,
    /// Queued items abandoned because the stage faulted or was cancelled
    pub abandoned: u64,
}

struct Link<U> {
    target: Arc<dyn Target<U>>,
    predicate: Predicate<U>,
}

struct Shared<T> {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<T>>>,
    faults: Mutex<Vec<StageFault>>,
    halt: CancellationToken,
    state: watch::Sender<StageState>,
    submitted: AtomicU64,
    processed: AtomicU64,
    unrouted: AtomicU64,
    abandoned: AtomicU64,
}

impl<T> Shared<T> {
    fn close_input(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn record_faults(&self, faults: impl IntoIterator<Item = StageFault>) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(faults);
        self.halt.cancel();
    }

    fn faults(&self) -> Vec<StageFault> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn has_faults(&self) -> bool {
        !self.faults.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Clonable handle for feeding a stage
///
/// This is what upstream stages link to. `complete()` and `fault()` act on the
/// stage itself, not on the individual handle.
pub struct StageInput<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StageInput<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> StageInput<T> {
    /// Queue an item; hands it back if the stage no longer accepts input
    pub fn submit(&self, item: T) -> Result<(), T> {
        let guard = self.shared.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => match tx.send(item) {
                Ok(()) => {
                    self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(mpsc::error::SendError(item)) => Err(item),
            },
            None => Err(item),
        }
    }

    /// Signal that no further items will be submitted
    ///
    /// Items already queued are still processed before the stage completes.
    pub fn complete(&self) {
        debug!(stage = %self.shared.name, "Input completed");
        self.shared.close_input();
    }

    /// Fault the stage with errors from elsewhere (typically an upstream stage)
    pub fn fault(&self, faults: &[StageFault]) {
        warn!(
            stage = %self.shared.name,
            faults = faults.len(),
            "Stage faulted from upstream"
        );
        self.shared.record_faults(faults.iter().cloned());
        self.shared.close_input();
    }

    /// Adapt this input to accept `Option<T>`, declining `None`
    pub fn flatten(&self) -> FlattenTarget<T> {
        FlattenTarget::new(self.clone())
    }

}

/// Handle to a running stage
pub struct Stage<T> {
    input: StageInput<T>,
}

impl<T: Send + 'static> Stage<T> {
    /// Start configuring a stage around a unit of work
    ///
    /// Defaults: unbounded parallelism, a fresh cancellation token, no links.
    pub fn builder<U, F, Fut>(name: impl Into<String>, work: F) -> StageBuilder<T, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<U>> + Send + 'static,
    {
        let work: WorkFn<T, U> = Arc::new(move |item| Box::pin(work(item)));
        StageBuilder {
            name: name.into(),
            work,
            parallelism: Parallelism::Unbounded,
            cancel: CancellationToken::new(),
            links: Vec::new(),
        }
    }

    /// Handle for submitting items and signalling completion
    pub fn input(&self) -> StageInput<T> {
        self.input.clone()
    }

    /// See [`StageInput::submit`]
    pub fn submit(&self, item: T) -> Result<(), T> {
        self.input.submit(item)
    }

    /// See [`StageInput::complete`]
    pub fn complete(&self) {
        self.input.complete()
    }

    /// See [`StageInput::fault`]
    pub fn fault(&self, faults: &[StageFault]) {
        self.input.fault(faults)
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.input.shared.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> StageState {
        *self.input.shared.state.borrow()
    }

    /// Item counts so far
    pub fn stats(&self) -> StageStats {
        let shared = &self.input.shared;
        StageStats {
            submitted: shared.submitted.load(Ordering::Relaxed),
            processed: shared.processed.load(Ordering::Relaxed),
            unrouted: shared.unrouted.load(Ordering::Relaxed),
            abandoned: shared.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Wait until the stage reaches a terminal state
    ///
    /// May be awaited from any number of tasks.
    pub async fn await_completion(&self) -> Result<(), StageError> {
        let shared = &self.input.shared;
        let mut rx = shared.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // the sender lives in `shared`, which we hold
            Err(_) => StageState::Faulted,
        };

        match state {
            StageState::Completed => Ok(()),
            StageState::Cancelled => Err(StageError::Cancelled),
            _ => Err(StageError::Faulted(shared.faults())),
        }
    }
}

/// Configures and spawns a [`Stage`]
///
/// Links are fixed here, before the stage starts, so no output can race a
/// link registration.
pub struct StageBuilder<T, U> {
    name: String,
    work: WorkFn<T, U>,
    parallelism: Parallelism,
    cancel: CancellationToken,
    links: Vec<Link<U>>,
}

impl<T: Send + 'static, U: Send + 'static> StageBuilder<T, U> {
    /// Cap on concurrently running units of work
    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Cancellation signal shared with the rest of the pipeline
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Route outputs matching `predicate` to `target`
    ///
    /// Links are evaluated in registration order and the first one that
    /// accepts an output receives it.
    pub fn link_to<X, P>(mut self, target: X, predicate: P) -> Self
    where
        X: Target<U> + 'static,
        P: Fn(&U) -> bool + Send + Sync + 'static,
    {
        self.links.push(Link {
            target: Arc::new(target),
            predicate: Box::new(predicate),
        });
        self
    }

    /// Start the stage on the current tokio runtime
    pub fn spawn(self) -> Stage<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(StageState::Running);

        let shared = Arc::new(Shared {
            name: self.name,
            tx: Mutex::new(Some(tx)),
            faults: Mutex::new(Vec::new()),
            halt: CancellationToken::new(),
            state,
            submitted: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        });

        // Limited(0) would never run anything; the semaphore cannot hold more than MAX_PERMITS
        let limiter = self
            .parallelism
            .limit()
            .map(|n| Arc::new(Semaphore::new(n.clamp(1, Semaphore::MAX_PERMITS))));

        debug!(stage = %shared.name, parallelism = %self.parallelism, "Starting stage");

        tokio::spawn(run_stage(
            Arc::clone(&shared),
            rx,
            self.work,
            limiter,
            self.cancel,
            Arc::new(self.links),
        ));

        Stage {
            input: StageInput { shared },
        }
    }
}

/// Dispatcher loop: pull, gate on the semaphore, spawn, then drain and finish.
async fn run_stage<T, U>(
    shared: Arc<Shared<T>>,
    mut rx: mpsc::UnboundedReceiver<T>,
    work: WorkFn<T, U>,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    links: Arc<Vec<Link<U>>>,
) where
    T: Send + 'static,
    U: Send + 'static,
{
    let mut tasks = JoinSet::new();

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = shared.halt.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let permit = match &limiter {
            Some(semaphore) => tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = shared.halt.cancelled() => break,
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        while let Some(joined) = tasks.try_join_next() {
            record_join(&shared, joined);
        }

        let fut = work(item);
        let shared_task = Arc::clone(&shared);
        let links = Arc::clone(&links);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = fut => result,
            };
            shared_task.processed.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(output) => route(&shared_task, &links, output),
                Err(e) => {
                    warn!(stage = %shared_task.name, error = %e, "Unit of work failed, faulting stage");
                    shared_task.record_faults([work_fault(&shared_task.name, &e)]);
                }
            }
        });
    }

    shared.close_input();
    let draining = if shared.halt.is_cancelled() {
        StageState::Faulting
    } else {
        StageState::Completing
    };
    shared.state.send_replace(draining);

    while let Some(joined) = tasks.join_next().await {
        record_join(&shared, joined);
    }

    rx.close();
    let mut abandoned = 0u64;
    while rx.try_recv().is_ok() {
        abandoned += 1;
    }
    if abandoned > 0 {
        shared.abandoned.fetch_add(abandoned, Ordering::Relaxed);
        debug!(stage = %shared.name, abandoned, "Dropped queued items");
    }

    let final_state = if shared.has_faults() {
        let faults = shared.faults();
        for link in links.iter() {
            link.target.fault(&faults);
        }
        StageState::Faulted
    } else {
        for link in links.iter() {
            link.target.complete();
        }
        if cancel.is_cancelled() {
            StageState::Cancelled
        } else {
            StageState::Completed
        }
    };

    debug!(stage = %shared.name, state = ?final_state, "Stage finished");
    shared.state.send_replace(final_state);
}

fn route<T, U>(shared: &Shared<T>, links: &[Link<U>], output: U) {
    let mut output = output;
    for link in links {
        if !(link.predicate)(&output) {
            continue;
        }
        match link.target.offer(output) {
            Ok(()) => return,
            Err(declined) => output = declined,
        }
    }
    shared.unrouted.fetch_add(1, Ordering::Relaxed);
    debug!(stage = %shared.name, "Output matched no link");
}

fn record_join<T>(shared: &Shared<T>, joined: Result<(), JoinError>) {
    let Err(e) = joined else {
        return;
    };
    if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!(stage = %shared.name, panic = %message, "Unit of work panicked, faulting stage");
        shared.record_faults([StageFault::Panicked {
            stage: shared.name.clone(),
            message,
        }]);
    }
}

fn work_fault(stage: &str, e: &Error) -> StageFault {
    StageFault::Work {
        stage: stage.to_string(),
        message: e.to_string(),
    }
}
