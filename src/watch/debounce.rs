//! Trailing-edge debouncing of change triggers.
//!
//! Editors save in bursts (truncate, write, rename, chmod). A burst collapses
//! into one notification, fired once no trigger arrived for the whole window.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

/// A raw change signal fed to the debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A watched file was written, created or renamed into place.
    Changed(PathBuf),
    /// Events may have been lost; consumers should reload regardless.
    Forced,
}

/// Why a reload was announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadReason {
    Changed,
    Forced,
}

/// A collapsed burst of triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Burst {
    pub reason: ReloadReason,
    /// Distinct changed paths, in arrival order
    pub paths: Vec<PathBuf>,
}

impl Burst {
    fn start(trigger: Trigger) -> Self {
        let mut burst = Self { reason: ReloadReason::Changed, paths: Vec::new() };
        burst.absorb(trigger);
        burst
    }

    fn absorb(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Changed(path) => {
                if !self.paths.contains(&path) {
                    self.paths.push(path);
                }
            }
            Trigger::Forced => self.reason = ReloadReason::Forced,
        }
    }
}

/// Spawn a thread that collapses triggers from `rx` and calls `on_fire` once per burst.
///
/// The thread exits when every sender is dropped, firing a pending burst first.
pub fn spawn_debouncer<F>(rx: Receiver<Trigger>, window: Duration, mut on_fire: F) -> JoinHandle<()>
where
    F: FnMut(Burst) + Send + 'static,
{
    thread::spawn(move || {
        // Wait for the first trigger of a burst
        while let Ok(first) = rx.recv() {
            let mut burst = Burst::start(first);

            loop {
                match rx.recv_timeout(window) {
                    Ok(trigger) => burst.absorb(trigger),
                    Err(RecvTimeoutError::Timeout) => {
                        on_fire(burst);
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        on_fire(burst);
                        return;
                    }
                }
            }
        }

        tracing::debug!("Debouncer stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_burst_collapses_to_one() {
        let (tx, rx) = mpsc::channel();
        let (fired_tx, fired_rx) = mpsc::channel();
        let handle = spawn_debouncer(rx, Duration::from_millis(100), move |burst| {
            let _ = fired_tx.send(burst);
        });

        for _ in 0..5 {
            tx.send(Trigger::Changed(PathBuf::from("/rb/runbook.yaml"))).unwrap();
            thread::sleep(Duration::from_millis(20));
        }

        let burst = fired_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(burst.reason, ReloadReason::Changed);
        assert_eq!(burst.paths, vec![PathBuf::from("/rb/runbook.yaml")]);
        assert!(fired_rx.recv_timeout(Duration::from_millis(300)).is_err());

        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_fires_after_quiet_window() {
        let (tx, rx) = mpsc::channel();
        let (fired_tx, fired_rx) = mpsc::channel();
        spawn_debouncer(rx, Duration::from_millis(150), move |_| {
            let _ = fired_tx.send(Instant::now());
        });

        let sent = Instant::now();
        tx.send(Trigger::Changed(PathBuf::from("a"))).unwrap();
        let fired = fired_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired.duration_since(sent) >= Duration::from_millis(150));
    }

    #[test]
    fn test_forced_trigger_wins() {
        let (tx, rx) = mpsc::channel();
        let (fired_tx, fired_rx) = mpsc::channel();
        spawn_debouncer(rx, Duration::from_millis(50), move |burst| {
            let _ = fired_tx.send(burst);
        });

        tx.send(Trigger::Changed(PathBuf::from("a"))).unwrap();
        tx.send(Trigger::Forced).unwrap();

        let burst = fired_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(burst.reason, ReloadReason::Forced);
    }

    #[test]
    fn test_pending_burst_fires_on_disconnect() {
        let (tx, rx) = mpsc::channel();
        let (fired_tx, fired_rx) = mpsc::channel();
        let handle = spawn_debouncer(rx, Duration::from_secs(60), move |burst| {
            let _ = fired_tx.send(burst);
        });

        tx.send(Trigger::Changed(PathBuf::from("a"))).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert!(fired_rx.try_recv().is_ok());
    }
}
