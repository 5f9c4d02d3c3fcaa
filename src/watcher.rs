//! Polls a remote file's modification time and reports changes.
//!
//! Each [`FileWatcher`] owns one background thread:
//!
//! ```text
//!   Idle ──start()──► Running ──stop()──► Stopped
//! ```
//!
//! The thread runs `stat -c %Y` on the remote host, compares the answer with
//! the last one seen and sends a [`WatchEvent`] when it differs.  The first
//! successful read always counts as a change.  Failed polls are logged and
//! retried on the next cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::remote::{CommandOutput, RemoteHost, shell_quote};

/// A detected change of the watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Generation of the watcher that saw it; lets a channel discard events
    /// from a watcher it has since replaced.
    pub generation: u64,
    pub path: String,
    /// Modification time, Unix seconds.
    pub mtime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Running,
    Stopped,
}

/// Remembers the last modification time and decides what is a change.
#[derive(Debug, Clone, Default)]
pub struct MtimeTracker {
    last: Option<i64>,
}

impl MtimeTracker {
    /// Record `mtime`; true when it differs from the previous value or is the
    /// first one seen.
    pub fn observe(&mut self, mtime: i64) -> bool {
        if self.last == Some(mtime) {
            return false;
        }
        self.last = Some(mtime);
        true
    }

    pub fn last(&self) -> Option<i64> {
        self.last
    }
}

/// Shell command printing the modification time of `path`.
pub fn mtime_command(path: &str) -> String {
    format!("stat -c %Y {}", shell_quote(path))
}

/// Extract the epoch seconds printed by [`mtime_command`].
pub fn parse_mtime(output: &CommandOutput) -> Result<i64> {
    if !output.success() {
        bail!("stat failed ({:?}): {}", output.status, output.stderr.trim());
    }
    let text = output.stdout.trim();
    text.parse::<i64>()
        .with_context(|| format!("unexpected stat output {text:?}"))
}

// ---------------------------------------------------------------------------
// FileWatcher
// ---------------------------------------------------------------------------

pub struct FileWatcher {
    host: Arc<dyn RemoteHost>,
    path: String,
    interval: Duration,
    generation: u64,
    state: WatchState,
    running: Arc<AtomicBool>,
    /// Dropped on stop, which wakes the thread out of its sleep.
    wake: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(host: Arc<dyn RemoteHost>, path: impl Into<String>, interval: Duration) -> Self {
        Self {
            host,
            path: path.into(),
            interval,
            generation: 0,
            state: WatchState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            wake: None,
            handle: None,
        }
    }

    /// Tag events from this watcher with `generation`.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Start polling on a background thread, reporting changes to `events`.
    pub fn start(&mut self, events: Sender<WatchEvent>) -> Result<()> {
        if self.state != WatchState::Idle {
            bail!("watcher for {} was already started", self.path);
        }

        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(0);
        self.running.store(true, Ordering::Release);

        let poller = Poller {
            host: Arc::clone(&self.host),
            path: self.path.clone(),
            generation: self.generation,
            interval: self.interval,
            running: Arc::clone(&self.running),
            wake: wake_rx,
            events,
        };
        let handle = std::thread::Builder::new()
            .name(format!("watch {}", self.path))
            .spawn(move || poller.run())
            .context("spawning watcher thread")?;

        info!("Watching {} (generation {})", self.path, self.generation);
        self.wake = Some(wake_tx);
        self.handle = Some(handle);
        self.state = WatchState::Running;
        Ok(())
    }

    /// Stop polling and wait for the thread to exit.  Safe to call more than
    /// once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        drop(self.wake.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Watcher thread for {} panicked", self.path);
            }
            debug!("Stopped watching {}", self.path);
        }
        if self.state == WatchState::Running {
            self.state = WatchState::Stopped;
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller {
    host: Arc<dyn RemoteHost>,
    path: String,
    generation: u64,
    interval: Duration,
    running: Arc<AtomicBool>,
    wake: Receiver<()>,
    events: Sender<WatchEvent>,
}

impl Poller {
    fn run(self) {
        let command = mtime_command(&self.path);
        let mut tracker = MtimeTracker::default();
        let mut failing = false;

        while self.running.load(Ordering::Acquire) {
            match self.host.execute(&command).and_then(|out| parse_mtime(&out)) {
                Ok(mtime) => {
                    failing = false;
                    if tracker.observe(mtime) {
                        info!("{} modified (mtime {mtime})", self.path);
                        let event = WatchEvent {
                            generation: self.generation,
                            path: self.path.clone(),
                            mtime,
                        };
                        if self.events.send(event).is_err() {
                            debug!("Nobody listens for {} any more", self.path);
                            break;
                        }
                    }
                }
                // Only the first of a run of failures is worth a warning.
                Err(e) if !failing => {
                    failing = true;
                    warn!("Error watching {}: {e:#}", self.path);
                }
                Err(e) => debug!("Error watching {}: {e:#}", self.path),
            }

            match self.wake.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}
