//! Session state tracking and event delivery.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use picam_types::{PipelineEvent, SessionState};
use tracing::{debug, warn};

/// Publishes session state and events to the owner of a session.
///
/// Events are dropped with a warning when the channel is full, so a slow
/// reader never stalls capture.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<PipelineEvent>>,
    state: Arc<RwLock<SessionState>>,
}

impl EventSink {
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self {
            tx: Some(tx),
            state: Arc::default(),
        }
    }

    /// A sink that only tracks state.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }

    pub fn transition_to(&self, new_state: SessionState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send(PipelineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }
}
