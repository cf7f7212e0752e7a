//! When video capture runs, pauses and stops.

use std::time::{Duration, Instant};

use picam_camera::ZoomCommand;
use picam_types::{ControlCommand, ExternalSignal, VideoConfig, WaitMethod};
use tracing::{error, info};

use crate::controls::SessionControls;
use crate::error::PipelineError;

/// What the capture loop does after a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Switch between running and paused.
    Toggle,

    /// Apply a zoom step and keep the current state.
    Zoom(ZoomCommand),

    /// End the session.
    Stop,
}

/// One pacing policy for the video capture loop.
pub trait CapturePacer: Send {
    /// Block until the next transition. `capturing` is the current state.
    fn next(&mut self, capturing: bool, controls: &SessionControls) -> Transition;
}

/// Build the pacer selected by `config.wait_method`.
pub fn video_pacer(config: &VideoConfig) -> Box<dyn CapturePacer> {
    let timeout = config.timeout();
    let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
    match config.wait_method {
        WaitMethod::None => Box::new(RunOnce { deadline }),
        WaitMethod::Timed => Box::new(Timed {
            on: Duration::from_millis(config.on_time_ms),
            off: Duration::from_millis(config.off_time_ms),
            deadline,
        }),
        WaitMethod::Keypress => Box::new(Keypress { deadline }),
        WaitMethod::Signal => Box::new(SignalToggle { deadline }),
        WaitMethod::Forever => Box::new(Forever),
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|end| Instant::now() >= end)
}

/// Run for the timeout, or until aborted when there is none.
struct RunOnce {
    deadline: Option<Instant>,
}

impl CapturePacer for RunOnce {
    fn next(&mut self, _capturing: bool, controls: &SessionControls) -> Transition {
        match self.deadline {
            Some(end) => {
                controls.pause_and_test_abort(end.saturating_duration_since(Instant::now()));
            }
            None => controls.wait_for_abort(),
        }
        Transition::Stop
    }
}

/// Alternate on and off periods until the timeout.
struct Timed {
    on: Duration,
    off: Duration,
    deadline: Option<Instant>,
}

impl CapturePacer for Timed {
    fn next(&mut self, capturing: bool, controls: &SessionControls) -> Transition {
        let mut pause = if capturing { self.on } else { self.off };
        if let Some(end) = self.deadline {
            pause = pause.min(end.saturating_duration_since(Instant::now()));
        }
        if controls.pause_and_test_abort(pause) || expired(self.deadline) {
            return Transition::Stop;
        }
        Transition::Toggle
    }
}

/// Toggle on each line of input.
struct Keypress {
    deadline: Option<Instant>,
}

impl CapturePacer for Keypress {
    fn next(&mut self, capturing: bool, controls: &SessionControls) -> Transition {
        info!(
            "Press Enter to {}, X then ENTER to exit, [i,o,r] then ENTER to change zoom",
            if capturing { "pause" } else { "capture" }
        );
        match controls.next_command(self.deadline) {
            Some(ControlCommand::Toggle) => Transition::Toggle,
            Some(ControlCommand::ZoomIn) => Transition::Zoom(ZoomCommand::In),
            Some(ControlCommand::ZoomOut) => Transition::Zoom(ZoomCommand::Out),
            Some(ControlCommand::ZoomReset) => Transition::Zoom(ZoomCommand::Reset),
            Some(ControlCommand::Exit) | None => Transition::Stop,
        }
    }
}

/// Toggle on each external notification.
struct SignalToggle {
    deadline: Option<Instant>,
}

impl CapturePacer for SignalToggle {
    fn next(&mut self, capturing: bool, controls: &SessionControls) -> Transition {
        info!(
            "Waiting for SIGUSR1 to {}",
            if capturing { "pause" } else { "capture" }
        );
        match controls.next_signal(self.deadline) {
            Some(ExternalSignal::Continue) => Transition::Toggle,
            Some(ExternalSignal::Exit) | None => Transition::Stop,
            Some(ExternalSignal::Failed { errno }) => {
                error!("{}", PipelineError::SignalWait { errno });
                Transition::Toggle
            }
        }
    }
}

/// Never changes state; only an abort ends the session.
struct Forever;

impl CapturePacer for Forever {
    fn next(&mut self, _capturing: bool, controls: &SessionControls) -> Transition {
        controls.wait_for_abort();
        Transition::Stop
    }
}

/// Output segment numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCounter {
    current: u32,
    wrap: u32,
}

impl SegmentCounter {
    /// Start at `first`; wrap back to 1 after `wrap` (0 never wraps).
    pub fn new(first: u32, wrap: u32) -> Self {
        Self {
            current: first,
            wrap,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Move to the next segment and return its number.
    pub fn advance(&mut self) -> u32 {
        self.current = self.current.wrapping_add(1);
        if self.wrap != 0 && self.current > self.wrap {
            self.current = 1;
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_wraps_to_one() {
        let mut counter = SegmentCounter::new(1, 3);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.advance(), 3);
        assert_eq!(counter.advance(), 1);
    }

    #[test]
    fn test_segment_without_wrap() {
        let mut counter = SegmentCounter::new(1, 0);
        for _ in 0..10 {
            counter.advance();
        }
        assert_eq!(counter.current(), 11);
    }

    #[test]
    fn test_timed_alternates_until_deadline() {
        let controls = SessionControls::new();
        let mut pacer = Timed {
            on: Duration::from_millis(50),
            off: Duration::from_millis(50),
            deadline: Some(Instant::now() + Duration::from_millis(125)),
        };
        assert_eq!(pacer.next(true, &controls), Transition::Toggle);
        assert_eq!(pacer.next(false, &controls), Transition::Toggle);
        assert_eq!(pacer.next(true, &controls), Transition::Stop);
    }

    #[test]
    fn test_timed_stops_on_abort() {
        let controls = SessionControls::new();
        controls.abort();
        let mut pacer = Timed {
            on: Duration::from_secs(5),
            off: Duration::from_secs(5),
            deadline: None,
        };
        assert_eq!(pacer.next(true, &controls), Transition::Stop);
    }

    #[test]
    fn test_keypress_commands() {
        let (tx, rx) = picam_types::command_channel();
        let controls = SessionControls::new().with_commands(rx);
        let mut pacer = Keypress { deadline: None };

        tx.send(ControlCommand::Toggle).unwrap();
        tx.send(ControlCommand::ZoomOut).unwrap();
        tx.send(ControlCommand::Exit).unwrap();
        assert_eq!(pacer.next(true, &controls), Transition::Toggle);
        assert_eq!(pacer.next(false, &controls), Transition::Zoom(ZoomCommand::Out));
        assert_eq!(pacer.next(false, &controls), Transition::Stop);
    }

    #[test]
    fn test_signal_failure_keeps_running() {
        let (tx, rx) = picam_types::signal_channel();
        let controls = SessionControls::new().with_signals(rx);
        let mut pacer = SignalToggle { deadline: None };

        tx.send(ExternalSignal::Failed { errno: 4 }).unwrap();
        tx.send(ExternalSignal::Continue).unwrap();
        assert_eq!(pacer.next(true, &controls), Transition::Toggle);
        assert_eq!(pacer.next(false, &controls), Transition::Toggle);
        drop(tx);
        assert_eq!(pacer.next(true, &controls), Transition::Stop);
    }

    #[test]
    fn test_run_once_with_short_timeout() {
        let config = VideoConfig {
            timeout_ms: Some(20),
            ..VideoConfig::default()
        };
        let mut pacer = video_pacer(&config);
        assert_eq!(pacer.next(true, &SessionControls::new()), Transition::Stop);
    }
}
