//! External inputs: Ctrl-C, lines on stdin and user signals.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use picam_types::{ControlCommand, ExternalSignal};
use tracing::{debug, info, warn};

/// Set `abort` on Ctrl-C.
pub fn install_ctrlc(abort: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Interrupted, stopping");
        abort.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")
}

/// Forward each line of stdin as a [`ControlCommand`].
///
/// The thread ends at end of input or once the session stops listening.
pub fn spawn_stdin_reader(tx: Sender<ControlCommand>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            };
            let command = ControlCommand::parse_line(&line);
            debug!(?command, "Input command");
            if tx.send(command).is_err() {
                break;
            }
        }
    });
}

/// Block SIGUSR1 and SIGUSR2 on the calling thread.
///
/// Must run before any other thread is spawned so that every thread
/// inherits the mask and the signals are only seen by [`sigwait`].
///
/// [`sigwait`]: libc::sigwait
#[cfg(unix)]
pub fn block_user_signals() -> Result<UserSignals> {
    // SAFETY: `set` is a plain C struct initialised by sigemptyset before use.
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    // SAFETY: `set` points to valid, writable memory for the duration of each call.
    let rc = unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGUSR1);
        libc::sigaddset(&mut set, libc::SIGUSR2);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(std::io::Error::from_raw_os_error(rc)).context("Failed to block user signals");
    }
    Ok(UserSignals { set })
}

/// The blocked user signal set.
#[cfg(unix)]
pub struct UserSignals {
    set: libc::sigset_t,
}

#[cfg(unix)]
impl UserSignals {
    /// Translate delivered signals into [`ExternalSignal`]s on a
    /// dedicated thread. SIGUSR1 continues, SIGUSR2 exits.
    pub fn spawn_listener(self, tx: Sender<ExternalSignal>) {
        thread::spawn(move || loop {
            let mut signum: libc::c_int = 0;
            // SAFETY: both pointers are valid for the call and the set was
            // initialised by `block_user_signals`.
            let rc = unsafe { libc::sigwait(&self.set, &mut signum) };

            let signal = if rc != 0 {
                ExternalSignal::Failed { errno: rc }
            } else if signum == libc::SIGUSR2 {
                ExternalSignal::Exit
            } else {
                ExternalSignal::Continue
            };
            debug!(?signal, "User signal");

            let failed = matches!(signal, ExternalSignal::Failed { .. });
            if tx.send(signal).is_err() || failed {
                break;
            }
        });
    }
}
