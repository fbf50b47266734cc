//! Link targets: where a stage's outputs go.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::{StageFault, StageInput};

/// Receiver of a stage's outputs and of its final outcome
pub trait Target<T>: Send + Sync {
    /// Offer one output; hand it back to decline it
    fn offer(&self, item: T) -> Result<(), T>;

    /// The upstream stage finished without faults
    fn complete(&self);

    /// The upstream stage faulted
    fn fault(&self, faults: &[StageFault]);
}

impl<T, X> Target<T> for Arc<X>
where
    X: Target<T> + ?Sized,
{
    fn offer(&self, item: T) -> Result<(), T> {
        (**self).offer(item)
    }

    fn complete(&self) {
        (**self).complete()
    }

    fn fault(&self, faults: &[StageFault]) {
        (**self).fault(faults)
    }
}

impl<T: Send + 'static> Target<T> for StageInput<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        self.submit(item)
    }

    fn complete(&self) {
        StageInput::complete(self)
    }

    fn fault(&self, faults: &[StageFault]) {
        StageInput::fault(self, faults)
    }
}

/// Feeds `Some(item)` into a stage and declines `None`
///
/// Lets a stage whose unit of work yields `Option<T>` link straight into a stage
/// that takes `T`.
pub struct FlattenTarget<T> {
    input: StageInput<T>,
}

impl<T> FlattenTarget<T> {
    pub(super) fn new(input: StageInput<T>) -> Self {
        Self { input }
    }
}

impl<T: Send + 'static> Target<Option<T>> for FlattenTarget<T> {
    fn offer(&self, item: Option<T>) -> Result<(), Option<T>> {
        match item {
            Some(item) => self.input.submit(item).map_err(Some),
            None => Err(None),
        }
    }

    fn complete(&self) {
        self.input.complete()
    }

    fn fault(&self, faults: &[StageFault]) {
        self.input.fault(faults)
    }
}

/// Explicit drop path: accepts and discards everything, counting it
#[derive(Debug)]
pub struct DiscardSink {
    name: String,
    discarded: AtomicU64,
}

impl DiscardSink {
    /// Create a named sink
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            discarded: AtomicU64::new(0),
        })
    }

    /// Number of items discarded so far
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl<T: Send> Target<T> for DiscardSink {
    fn offer(&self, _item: T) -> Result<(), T> {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn complete(&self) {
        debug!(sink = %self.name, discarded = self.discarded(), "Discard sink completed");
    }

    fn fault(&self, faults: &[StageFault]) {
        debug!(sink = %self.name, faults = faults.len(), "Discard sink saw upstream fault");
    }
}
