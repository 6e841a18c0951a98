//! Presentation events: what the core tells its host after a commit.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::region::{BBox, CandidateRegion};
use crate::stations::StationId;

#[derive(Clone, Debug, PartialEq)]
pub enum CoreEvent {
    /// A new Candidate Region was committed.
    RegionChanged(CandidateRegion),
    FocusStation(StationId),
    FitViewport { bbox: BBox, animated: bool },
    /// User-facing message for a rejected input.
    ValidationError(String),
    /// Excluding this station emptied a non-empty region.
    Contradiction(StationId),
}

pub trait EventSink {
    fn emit(&mut self, event: CoreEvent);
}

impl EventSink for Vec<CoreEvent> {
    fn emit(&mut self, event: CoreEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<CoreEvent> {
    fn emit(&mut self, event: CoreEvent) {
        if self.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: CoreEvent) {}
}

/// Shared, clonable recorder; one clone goes into the session, the other
/// stays with whoever inspects the events.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Arc<Mutex<Vec<CoreEvent>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<CoreEvent> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: CoreEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
