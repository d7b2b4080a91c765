//! Termination signals bound to a cancellation token for a limited span.
//!
//! The listener swaps in its own SIGTERM and SIGINT handlers and puts the previous dispositions
//! back when it is dropped, so outside that span the process reacts to signals as before. The
//! handler only records the signal number; a watcher task turns it into token cancellation.
use std::{
    io,
    sync::atomic::{AtomicBool, AtomicI32, Ordering},
    time::Duration,
};

use libc::c_int;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ExecError, ExecResult};

const SIGNALS: [c_int; 2] = [libc::SIGTERM, libc::SIGINT];
const WATCH_INTERVAL: Duration = Duration::from_millis(20);

/// Last termination signal received while a listener is installed; `0` when none.
static PENDING: AtomicI32 = AtomicI32::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn record(signal: c_int) {
    PENDING.store(signal, Ordering::SeqCst);
}

/// Turns SIGTERM and SIGINT into cancellation of a token while it is alive.
///
/// At most one listener exists at a time.
pub struct TerminationListener {
    token: CancellationToken,
    previous: Vec<(c_int, libc::sigaction)>,
    task: JoinHandle<()>,
}

impl TerminationListener {
    /// Must be called inside a tokio runtime.
    pub fn install() -> ExecResult<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(ExecError::Signal("a termination listener is already installed".into()));
        }
        PENDING.store(0, Ordering::SeqCst);

        let mut previous = Vec::with_capacity(SIGNALS.len());
        for signal in SIGNALS {
            match swap_handler(signal) {
                Ok(old) => previous.push((signal, old)),
                Err(e) => {
                    restore(&previous);
                    INSTALLED.store(false, Ordering::SeqCst);
                    return Err(ExecError::Signal(format!("{} handler: {e}", signal_name(signal))));
                }
            }
        }
        debug!(target: "dvrun.exec.signal", "termination handlers installed");

        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move {
            loop {
                let signal = PENDING.swap(0, Ordering::SeqCst);
                if signal != 0 {
                    info!(target: "dvrun.exec.signal", signal = signal_name(signal), "termination requested");
                    child.cancel();
                    return;
                }
                tokio::select! {
                    _ = child.cancelled() => return,
                    _ = tokio::time::sleep(WATCH_INTERVAL) => {}
                }
            }
        });

        Ok(Self {
            token,
            previous,
            task,
        })
    }

    /// Token cancelled on the first termination signal.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TerminationListener {
    fn drop(&mut self) {
        self.task.abort();
        restore(&self.previous);
        INSTALLED.store(false, Ordering::SeqCst);
        debug!(target: "dvrun.exec.signal", "previous termination handlers restored");
    }
}

fn swap_handler(signal: c_int) -> io::Result<libc::sigaction> {
    // SAFETY: an all-zero sigaction is a valid value; the fields that matter are set below and
    // `record` only performs an atomic store.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = record as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        let mut old: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal, &action, &mut old) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(old)
    }
}

fn restore(previous: &[(c_int, libc::sigaction)]) {
    for (signal, old) in previous {
        // SAFETY: `old` was filled in by sigaction for this very signal.
        unsafe {
            libc::sigaction(*signal, old, std::ptr::null_mut());
        }
    }
}

fn signal_name(signal: c_int) -> &'static str {
    match signal {
        libc::SIGTERM => "SIGTERM",
        libc::SIGINT => "SIGINT",
        _ => "signal",
    }
}

#[cfg(test)]
pub(crate) fn current_handler(signal: c_int) -> libc::sighandler_t {
    // SAFETY: a null new action only queries the disposition.
    unsafe {
        let mut old: libc::sigaction = std::mem::zeroed();
        libc::sigaction(signal, std::ptr::null(), &mut old);
        old.sa_sigaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::signal_lock;

    #[tokio::test]
    async fn previous_dispositions_come_back_on_drop() {
        let _guard = signal_lock();
        let term_before = current_handler(libc::SIGTERM);
        let int_before = current_handler(libc::SIGINT);

        {
            let _listener = TerminationListener::install().unwrap();
            let ours = record as extern "C" fn(c_int) as libc::sighandler_t;
            assert_eq!(current_handler(libc::SIGTERM), ours);
            assert_eq!(current_handler(libc::SIGINT), ours);
        }

        assert_eq!(current_handler(libc::SIGTERM), term_before);
        assert_eq!(current_handler(libc::SIGINT), int_before);
    }

    #[tokio::test]
    async fn only_one_listener_at_a_time() {
        let _guard = signal_lock();
        let first = TerminationListener::install().unwrap();
        assert!(matches!(TerminationListener::install(), Err(ExecError::Signal(_))));
        drop(first);

        let again = TerminationListener::install();
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn sigterm_cancels_the_token() {
        let _guard = signal_lock();
        let listener = TerminationListener::install().unwrap();

        // SAFETY: the listener's handler is installed for SIGTERM.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }

        tokio::time::timeout(Duration::from_secs(5), listener.token().cancelled())
            .await
            .expect("token cancelled by SIGTERM");
    }
}
