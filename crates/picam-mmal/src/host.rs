//! Host bring-up.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::error::HalError;
use crate::graph::Graph;
use crate::{HalResult, Hardware};

/// Process-wide access to the hardware.
///
/// [`Host::bring_up`] must succeed once before any graph is built; later
/// calls are no-ops.
pub struct Host {
    hw: Arc<dyn Hardware>,
    ready: Mutex<bool>,
}

impl Host {
    pub fn new(hw: Arc<dyn Hardware>) -> Self {
        Self {
            hw,
            ready: Mutex::new(false),
        }
    }

    /// Bring up the host interface.
    #[instrument(name = "host_bring_up", skip(self))]
    pub fn bring_up(&self) -> HalResult<()> {
        let mut ready = self.ready.lock();
        if *ready {
            debug!("Host already up");
            return Ok(());
        }
        self.hw.bring_up()?;
        *ready = true;
        info!("Host brought up");
        Ok(())
    }

    /// Returns true once bring-up has succeeded.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Create an empty graph on this host.
    pub fn graph(&self) -> HalResult<Graph> {
        if !self.is_ready() {
            return Err(HalError::HostNotReady);
        }
        Ok(Graph::new(Arc::clone(&self.hw)))
    }

    /// The underlying hardware.
    pub fn hardware(&self) -> &Arc<dyn Hardware> {
        &self.hw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedHardware;

    #[test]
    fn test_bring_up_is_idempotent() {
        let sim = Arc::new(SimulatedHardware::default());
        let host = Host::new(sim.clone());
        assert!(matches!(host.graph(), Err(HalError::HostNotReady)));
        host.bring_up().unwrap();
        host.bring_up().unwrap();
        assert_eq!(sim.bring_up_count(), 1);
        assert!(host.graph().is_ok());
    }
}
