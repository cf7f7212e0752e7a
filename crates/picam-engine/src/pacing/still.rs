//! When the next still frame is captured.

use std::time::{Duration, Instant};

use picam_types::{ControlCommand, ExternalSignal, FrameNextMethod, StillConfig};
use tracing::{error, info};

use crate::controls::SessionControls;
use crate::error::PipelineError;

/// Time for exposure and white balance to settle before the first frame.
pub const CAMERA_SETTLE_TIME: Duration = Duration::from_millis(1000);

/// Gap between frames in immediate mode.
const IMMEDIATE_GAP: Duration = Duration::from_millis(30);

/// Gap between frames in forever mode.
const FOREVER_GAP: Duration = Duration::from_millis(1000);

/// Outcome of one wait of the still loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Capture, then wait again.
    Continue,

    /// Capture, then stop.
    Last,

    /// Stop without capturing.
    Stop,
}

/// One pacing policy for the still capture loop.
pub trait FramePacer: Send {
    /// Block until the next capture is due, advancing `frame` to its index.
    fn wait_next(&mut self, frame: &mut u64, controls: &SessionControls) -> Pace;
}

/// Build the pacer selected by `config.frame_next`.
pub fn still_pacer(config: &StillConfig) -> Box<dyn FramePacer> {
    let timeout = config.timeout();
    let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
    match config.frame_next {
        FrameNextMethod::Single => Box::new(Single { timeout }),
        FrameNextMethod::Timelapse => Box::new(Timelapse {
            interval: Duration::from_millis(config.timelapse_ms),
            next_due: None,
            deadline,
        }),
        FrameNextMethod::Keypress => Box::new(Keypress { deadline }),
        FrameNextMethod::Forever => Box::new(Forever),
        FrameNextMethod::Gpio => Box::new(Gpio),
        FrameNextMethod::Signal => Box::new(SignalPaced { deadline }),
        FrameNextMethod::Immediate => Box::new(Immediate {
            settled: false,
            deadline,
        }),
    }
}

/// `Continue` while before the deadline, `Last` once it has passed.
fn until(deadline: Option<Instant>) -> Pace {
    match deadline {
        Some(end) if Instant::now() >= end => Pace::Last,
        _ => Pace::Continue,
    }
}

/// One capture after the timeout.
struct Single {
    timeout: Duration,
}

impl FramePacer for Single {
    fn wait_next(&mut self, _frame: &mut u64, controls: &SessionControls) -> Pace {
        if controls.pause_and_test_abort(self.timeout) {
            return Pace::Stop;
        }
        Pace::Last
    }
}

/// A capture roughly every second until aborted.
struct Forever;

impl FramePacer for Forever {
    fn wait_next(&mut self, frame: &mut u64, controls: &SessionControls) -> Pace {
        *frame += 1;
        if controls.pause_and_test_abort(FOREVER_GAP) {
            return Pace::Stop;
        }
        Pace::Continue
    }
}

/// Fixed interval captures against a running baseline.
struct Timelapse {
    interval: Duration,
    next_due: Option<Instant>,
    deadline: Option<Instant>,
}

impl FramePacer for Timelapse {
    fn wait_next(&mut self, frame: &mut u64, controls: &SessionControls) -> Pace {
        let pace = until(self.deadline);

        let Some(due) = self.next_due else {
            *frame += 1;
            if controls.pause_and_test_abort(CAMERA_SETTLE_TIME) {
                return Pace::Stop;
            }
            self.next_due = Some(Instant::now() + self.interval);
            return pace;
        };

        let now = Instant::now();
        let delay_ms = if due >= now {
            i64::try_from((due - now).as_millis()).unwrap_or(i64::MAX)
        } else {
            -i64::try_from((now - due).as_millis()).unwrap_or(i64::MAX)
        };
        let step = timelapse_step(delay_ms, self.interval.as_millis() as u64);
        if step.advance > 1 {
            info!("Skipping frame {} to restart at frame {}", *frame + 1, *frame + step.advance);
        } else if delay_ms < 0 {
            info!("Frame {} is {} ms late", *frame + 1, -delay_ms);
        }

        *frame += step.advance;
        self.next_due = Some(due + self.interval * step.baseline_intervals);
        if controls.pause_and_test_abort(step.sleep) {
            return Pace::Stop;
        }
        pace
    }
}

/// How one timelapse wait moves the frame index, the sleep and the
/// baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelapseStep {
    /// Amount added to the frame index.
    pub advance: u64,

    /// Time to sleep before capturing.
    pub sleep: Duration,

    /// Intervals the baseline moves forward by.
    pub baseline_intervals: u32,
}

/// Plan the next timelapse frame given the time until it is due
/// (`delay_ms`, negative when late) and the interval.
///
/// Less than half an interval late, the frame is taken at once. Later than
/// that, `1 + lateness / interval` frames are skipped and the capture
/// waits for the next aligned slot.
pub fn timelapse_step(delay_ms: i64, interval_ms: u64) -> TimelapseStep {
    let interval = i64::try_from(interval_ms.max(1)).unwrap_or(i64::MAX);

    if delay_ms >= 0 {
        return TimelapseStep {
            advance: 1,
            sleep: Duration::from_millis(delay_ms as u64),
            baseline_intervals: 1,
        };
    }

    let late = -delay_ms;
    if late < interval / 2 {
        return TimelapseStep {
            advance: 1,
            sleep: Duration::ZERO,
            baseline_intervals: 1,
        };
    }

    let skip = 1 + late / interval;
    let sleep_ms = (delay_ms + skip * interval).max(0);
    TimelapseStep {
        advance: skip as u64,
        sleep: Duration::from_millis(sleep_ms as u64),
        baseline_intervals: u32::try_from(skip + 1).unwrap_or(u32::MAX),
    }
}

/// One capture per line of input.
struct Keypress {
    deadline: Option<Instant>,
}

impl FramePacer for Keypress {
    fn wait_next(&mut self, frame: &mut u64, controls: &SessionControls) -> Pace {
        let pace = until(self.deadline);
        info!("Press Enter to capture, X then ENTER to exit");
        match controls.next_command(None) {
            Some(ControlCommand::Exit) | None => Pace::Stop,
            Some(_) => {
                *frame += 1;
                pace
            }
        }
    }
}

/// Back-to-back captures with a short gap.
struct Immediate {
    settled: bool,
    deadline: Option<Instant>,
}

impl FramePacer for Immediate {
    fn wait_next(&mut self, frame: &mut u64, controls: &SessionControls) -> Pace {
        let pace = until(self.deadline);
        let gap = if self.settled {
            IMMEDIATE_GAP
        } else {
            CAMERA_SETTLE_TIME
        };
        self.settled = true;
        if controls.pause_and_test_abort(gap) {
            return Pace::Stop;
        }
        *frame += 1;
        pace
    }
}

/// A single externally triggered capture.
struct Gpio;

impl FramePacer for Gpio {
    fn wait_next(&mut self, _frame: &mut u64, _controls: &SessionControls) -> Pace {
        Pace::Last
    }
}

/// Capture on each notification; `Exit` captures once more and stops.
struct SignalPaced {
    deadline: Option<Instant>,
}

impl FramePacer for SignalPaced {
    fn wait_next(&mut self, frame: &mut u64, controls: &SessionControls) -> Pace {
        let pace = until(self.deadline);
        info!("Waiting for SIGUSR1 to initiate capture and continue or SIGUSR2 to capture and exit");
        let pace = match controls.next_signal(None) {
            Some(ExternalSignal::Continue) => pace,
            Some(ExternalSignal::Exit) => Pace::Last,
            Some(ExternalSignal::Failed { errno }) => {
                error!("{}", PipelineError::SignalWait { errno });
                pace
            }
            None => return Pace::Stop,
        };
        *frame += 1;
        pace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timelapse_catch_up_skips() {
        let step = timelapse_step(-2500, 1000);
        assert_eq!(step.advance, 3);
        assert_eq!(step.sleep, Duration::from_millis(500));
        assert_eq!(step.baseline_intervals, 4);
    }

    #[test]
    fn test_timelapse_slightly_late() {
        let step = timelapse_step(-400, 1000);
        assert_eq!(step.advance, 1);
        assert_eq!(step.sleep, Duration::ZERO);
        assert_eq!(step.baseline_intervals, 1);
    }

    #[test]
    fn test_timelapse_on_time() {
        let step = timelapse_step(250, 1000);
        assert_eq!(step.advance, 1);
        assert_eq!(step.sleep, Duration::from_millis(250));
    }

    #[test]
    fn test_timelapse_half_interval_late_skips() {
        let step = timelapse_step(-500, 1000);
        assert_eq!(step.advance, 1);
        assert_eq!(step.sleep, Duration::from_millis(500));
        assert_eq!(step.baseline_intervals, 2);
    }

    #[test]
    fn test_single_is_last() {
        let mut pacer = Single {
            timeout: Duration::ZERO,
        };
        let mut frame = 0;
        assert_eq!(pacer.wait_next(&mut frame, &SessionControls::new()), Pace::Last);
        assert_eq!(frame, 0);
    }

    #[test]
    fn test_gpio_captures_once() {
        let mut frame = 0;
        assert_eq!(Gpio.wait_next(&mut frame, &SessionControls::new()), Pace::Last);
    }

    #[test]
    fn test_keypress_exit_does_not_capture() {
        let (tx, rx) = picam_types::command_channel();
        let controls = SessionControls::new().with_commands(rx);
        let mut pacer = Keypress { deadline: None };
        let mut frame = 0;

        tx.send(ControlCommand::Toggle).unwrap();
        tx.send(ControlCommand::Exit).unwrap();
        assert_eq!(pacer.wait_next(&mut frame, &controls), Pace::Continue);
        assert_eq!(frame, 1);
        assert_eq!(pacer.wait_next(&mut frame, &controls), Pace::Stop);
        assert_eq!(frame, 1);
    }

    #[test]
    fn test_signal_exit_captures_last() {
        let (tx, rx) = picam_types::signal_channel();
        let controls = SessionControls::new().with_signals(rx);
        let mut pacer = SignalPaced { deadline: None };
        let mut frame = 0;

        tx.send(ExternalSignal::Continue).unwrap();
        tx.send(ExternalSignal::Exit).unwrap();
        assert_eq!(pacer.wait_next(&mut frame, &controls), Pace::Continue);
        assert_eq!(pacer.wait_next(&mut frame, &controls), Pace::Last);
        assert_eq!(frame, 2);
    }

    #[test]
    fn test_aborted_wait_stops() {
        let controls = SessionControls::new();
        controls.abort();
        let mut frame = 0;
        assert_eq!(Forever.wait_next(&mut frame, &controls), Pace::Stop);
        let mut pacer = Single {
            timeout: Duration::from_secs(5),
        };
        assert_eq!(pacer.wait_next(&mut frame, &controls), Pace::Stop);
    }
}
