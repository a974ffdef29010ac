//! Cooperative lifecycle control for the acquisition daemons.
//!
//! Every background thread in the crate (receive daemon, data feeder, sort daemon)
//! runs a work loop that calls [`DaemonControl::check_state`] once per iteration.
//! The state is changed from other threads through a [`DaemonHandle`]:
//!
//! - `Run`: keep working.
//! - `Suspend`: the next `check_state` blocks until the state changes again.
//! - `Stop`: `check_state` returns `false` and the loop exits.
//!
//! Nothing is interrupted preemptively. A thread blocked in a socket receive only
//! notices a state change once the receive returns, so every blocking call in a
//! daemon loop is bounded by a timeout.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle state of a daemon thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Work loop runs.
    Run,
    /// Work loop parks at its next state check.
    Suspend,
    /// Work loop exits at its next state check.
    Stop,
}

/// Shared state flag with wake-up for suspended threads.
#[derive(Debug)]
pub struct DaemonControl {
    state: Mutex<ThreadState>,
    changed: Condvar,
}

impl Default for DaemonControl {
    fn default() -> Self {
        Self::new(ThreadState::Run)
    }
}

impl DaemonControl {
    /// Creates a control starting in `initial`.
    pub fn new(initial: ThreadState) -> Self {
        Self {
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ThreadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the state and wakes every thread parked in [`check_state`](Self::check_state).
    ///
    /// `Stop` is final: once stopped, later calls are ignored.
    pub fn set_state(&self, new_state: ThreadState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ThreadState::Stop {
            return;
        }
        *state = new_state;
        self.changed.notify_all();
    }

    /// Blocks while suspended. Returns `false` once the loop should exit.
    pub fn check_state(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state == ThreadState::Suspend {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state == ThreadState::Run
    }

    /// Sleeps for up to `timeout`, returning early when the state changes.
    ///
    /// Used by loops that pace themselves so a stop request is seen promptly.
    pub fn wait_timeout(&self, timeout: Duration) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        let _unused = self
            .changed
            .wait_timeout_while(state, timeout, |s| *s == current)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Owner of a spawned daemon thread.
#[derive(Debug)]
pub struct DaemonHandle {
    name: String,
    control: Arc<DaemonControl>,
    join: Option<JoinHandle<()>>,
}

impl DaemonHandle {
    /// Spawns `body` on a named thread. The body receives the control it must poll.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(Arc<DaemonControl>) + Send + 'static,
    {
        let control = Arc::new(DaemonControl::default());
        let thread_control = Arc::clone(&control);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_control))?;
        debug!(daemon = name, "daemon started");
        Ok(Self {
            name: name.to_string(),
            control,
            join: Some(join),
        })
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Control shared with the thread.
    pub fn control(&self) -> &Arc<DaemonControl> {
        &self.control
    }

    /// Current state.
    pub fn state(&self) -> ThreadState {
        self.control.state()
    }

    /// Parks the thread at its next state check.
    pub fn suspend(&self) {
        self.control.set_state(ThreadState::Suspend);
    }

    /// Resumes a suspended thread.
    pub fn resume(&self) {
        self.control.set_state(ThreadState::Run);
    }

    /// Requests the thread to exit without waiting for it.
    pub fn stop(&self) {
        self.control.set_state(ThreadState::Stop);
    }

    /// Requests exit and waits for the thread to finish.
    pub fn stop_and_join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.control.set_state(ThreadState::Stop);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(daemon = %self.name, "daemon thread panicked");
            } else {
                debug!(daemon = %self.name, "daemon stopped");
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
