//! Control surface: what makes a cycle run
//!
//! Cycles are requested by the periodic timer, once at startup, and by the
//! out-of-band force-flush trigger. The trigger is a channel with room for a
//! single pending request, so any number of triggers arriving while a cycle
//! runs collapse into one follow-up flush.

use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::EngineEvent;

/// Why a cycle ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// First cycle after the engine started
    Startup,
    /// Periodic timer
    Tick,
    /// Out-of-band force-flush request
    ForceFlush,
}

impl fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleTrigger::Startup => f.write_str("startup"),
            CycleTrigger::Tick => f.write_str("tick"),
            CycleTrigger::ForceFlush => f.write_str("force-flush"),
        }
    }
}

/// Result of [`FlushHandle::trigger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushRequest {
    /// The engine will flush at its next opportunity
    Queued,
    /// A flush was already pending; this request merged into it
    Coalesced,
    /// The engine has stopped
    Closed,
}

/// Handle for requesting a forced cache flush
///
/// Cheap to clone and safe to use from any task, e.g. a signal listener.
/// Never blocks.
#[derive(Debug, Clone)]
pub struct FlushHandle {
    tx: mpsc::Sender<()>,
    events: mpsc::Sender<EngineEvent>,
}

impl FlushHandle {
    pub(crate) fn new(tx: mpsc::Sender<()>, events: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx, events }
    }

    /// Request a forced flush
    pub fn trigger(&self) -> FlushRequest {
        match self.tx.try_send(()) {
            Ok(()) => {
                debug!("Force flush queued");
                FlushRequest::Queued
            }
            Err(TrySendError::Full(())) => {
                debug!("Force flush already pending, coalescing");
                let _ = self.events.try_send(EngineEvent::FlushCoalesced);
                FlushRequest::Coalesced
            }
            Err(TrySendError::Closed(())) => FlushRequest::Closed,
        }
    }
}
