//! Abort flag and the external inputs that drive the pacing loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use picam_types::{ControlCommand, ExternalSignal};

/// How often blocking waits check the abort flag.
pub const ABORT_INTERVAL: Duration = Duration::from_millis(100);

/// Inputs shared by the control thread, the dispatch workers and whoever
/// owns the session (signal handlers, input readers).
#[derive(Clone, Default)]
pub struct SessionControls {
    abort: Arc<AtomicBool>,
    commands: Option<Receiver<ControlCommand>>,
    signals: Option<Receiver<ExternalSignal>>,
}

impl SessionControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take interactive commands from `rx`.
    pub fn with_commands(mut self, rx: Receiver<ControlCommand>) -> Self {
        self.commands = Some(rx);
        self
    }

    /// Take external notifications from `rx`.
    pub fn with_signals(mut self, rx: Receiver<ExternalSignal>) -> Self {
        self.signals = Some(rx);
        self
    }

    /// The flag itself, for handlers that outlive the session.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Sleep for `pause`, checking the abort flag every [`ABORT_INTERVAL`].
    ///
    /// Returns true if the session was aborted.
    pub fn pause_and_test_abort(&self, pause: Duration) -> bool {
        let end = Instant::now() + pause;
        loop {
            if self.is_aborted() {
                return true;
            }
            let now = Instant::now();
            if now >= end {
                return false;
            }
            thread::sleep(ABORT_INTERVAL.min(end - now));
        }
    }

    /// Block until aborted.
    pub fn wait_for_abort(&self) {
        while !self.is_aborted() {
            thread::sleep(ABORT_INTERVAL);
        }
    }

    /// Wait for the next interactive command.
    ///
    /// Returns `None` on abort, when `deadline` passes, or when no command
    /// source remains.
    pub fn next_command(&self, deadline: Option<Instant>) -> Option<ControlCommand> {
        recv_polling(self.commands.as_ref()?, &self.abort, deadline)
    }

    /// Wait for the next external notification, with the same exits as
    /// [`next_command`](Self::next_command).
    pub fn next_signal(&self, deadline: Option<Instant>) -> Option<ExternalSignal> {
        recv_polling(self.signals.as_ref()?, &self.abort, deadline)
    }
}

fn recv_polling<T>(rx: &Receiver<T>, abort: &AtomicBool, deadline: Option<Instant>) -> Option<T> {
    loop {
        if abort.load(Ordering::SeqCst) {
            return None;
        }
        let wait = match deadline {
            Some(end) => {
                let now = Instant::now();
                if now >= end {
                    return None;
                }
                ABORT_INTERVAL.min(end - now)
            }
            None => ABORT_INTERVAL,
        };
        match rx.recv_timeout(wait) {
            Ok(value) => return Some(value),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_returns_early_on_abort() {
        let controls = SessionControls::new();
        let flag = controls.abort_flag();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });

        let start = Instant::now();
        assert!(controls.pause_and_test_abort(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_pause_without_abort() {
        let controls = SessionControls::new();
        assert!(!controls.pause_and_test_abort(Duration::ZERO));
        assert!(!controls.pause_and_test_abort(Duration::from_millis(20)));
    }

    #[test]
    fn test_next_command() {
        let (tx, rx) = picam_types::command_channel();
        let controls = SessionControls::new().with_commands(rx);
        tx.send(ControlCommand::ZoomIn).unwrap();
        assert_eq!(controls.next_command(None), Some(ControlCommand::ZoomIn));

        let soon = Instant::now() + Duration::from_millis(20);
        assert_eq!(controls.next_command(Some(soon)), None);

        drop(tx);
        assert_eq!(controls.next_command(None), None);
    }

    #[test]
    fn test_no_signal_source() {
        let controls = SessionControls::new();
        assert_eq!(controls.next_signal(None), None);
    }
}
