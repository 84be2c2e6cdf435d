//! Participant response monitoring during inter-trial waits.
//!
//! The monitor wraps a key-input capability with an explicit start/stop
//! lifecycle and interleaves non-blocking polls into the same busy/sleep
//! wait discipline as [`crate::clock::sleep`]. A single key in one poll is
//! a response; several keys in one poll are ambiguous input and are
//! discarded with a warning. The source is stopped on every exit path,
//! including when the wait naturally times out.

use thiserror::Error;
use tracing::{info, warn};

use crate::clock::{Clock, SPIN_THRESHOLD_NS};

/// One key event reported by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub label: String,
}

/// A logged participant response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub label: String,
    /// Offset into the monitored wait, in seconds.
    pub at_secs: f64,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("key source failed: {0}")]
    Source(String),
}

/// Key-input capability with an explicit lifecycle.
///
/// `poll` must be non-blocking and return the keys pressed since the last
/// poll. Implementations own whatever device handle they need between
/// `start` and `stop`.
pub trait KeySource {
    fn start(&mut self) -> Result<(), MonitorError>;
    fn poll(&mut self) -> Result<Vec<KeyEvent>, MonitorError>;
    fn stop(&mut self);
}

impl KeySource for Box<dyn KeySource> {
    fn start(&mut self) -> Result<(), MonitorError> {
        (**self).start()
    }

    fn poll(&mut self) -> Result<Vec<KeyEvent>, MonitorError> {
        (**self).poll()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Source for runs without a response device. Never reports keys.
#[derive(Debug, Default)]
pub struct NullKeys;

impl KeySource for NullKeys {
    fn start(&mut self) -> Result<(), MonitorError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<KeyEvent>, MonitorError> {
        Ok(Vec::new())
    }

    fn stop(&mut self) {}
}

/// Polls a [`KeySource`] while waiting out an interval.
pub struct ResponseMonitor<S: KeySource> {
    source: S,
}

impl<S: KeySource> ResponseMonitor<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Wait `duration_secs`, logging responses along the way.
    ///
    /// Returns once at least the full duration has elapsed, like
    /// [`crate::clock::sleep`]. The source is started before the first poll
    /// and stopped before returning, whether the wait completes or a poll
    /// fails.
    pub fn run(&mut self, duration_secs: f64) -> Result<Vec<Response>, MonitorError> {
        if !(duration_secs > 0.0) {
            return Ok(Vec::new());
        }
        self.source.start()?;
        let result = self.watch(duration_secs);
        self.source.stop();
        result
    }

    fn watch(&mut self, duration_secs: f64) -> Result<Vec<Response>, MonitorError> {
        let clock = Clock::new();
        let duration_ns = (duration_secs * 1e9) as u64;
        let mut responses = Vec::new();
        loop {
            let elapsed = clock.elapsed_ns();
            if elapsed >= duration_ns {
                break;
            }
            let keys = self.source.poll()?;
            match keys.len() {
                0 => {}
                1 => {
                    let key = &keys[0];
                    info!(key = %key.label, "response pressed");
                    responses.push(Response {
                        label: key.label.clone(),
                        at_secs: clock.elapsed_secs(),
                    });
                }
                n => {
                    warn!(keys = n, "simultaneous key presses, sample discarded");
                }
            }
            let remaining = duration_ns.saturating_sub(clock.elapsed_ns());
            if remaining >= SPIN_THRESHOLD_NS {
                std::thread::sleep(std::time::Duration::from_nanos(remaining / 2));
            } else {
                std::hint::spin_loop();
            }
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays scripted poll results and records its lifecycle.
    struct ScriptedKeys {
        polls: Arc<Mutex<Vec<Vec<KeyEvent>>>>,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        fail_poll: bool,
    }

    impl KeySource for ScriptedKeys {
        fn start(&mut self) -> Result<(), MonitorError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<KeyEvent>, MonitorError> {
            if self.fail_poll {
                return Err(MonitorError::Source("device unplugged".to_string()));
            }
            let mut polls = self.polls.lock().unwrap();
            if polls.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(polls.remove(0))
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn key(label: &str) -> KeyEvent {
        KeyEvent {
            label: label.to_string(),
        }
    }

    fn scripted(
        polls: Vec<Vec<KeyEvent>>,
        fail_poll: bool,
    ) -> (ScriptedKeys, Arc<AtomicBool>, Arc<AtomicBool>) {
        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let source = ScriptedKeys {
            polls: Arc::new(Mutex::new(polls)),
            started: Arc::clone(&started),
            stopped: Arc::clone(&stopped),
            fail_poll,
        };
        (source, started, stopped)
    }

    #[test]
    fn single_key_is_logged_as_response() {
        let (source, _, stopped) = scripted(vec![vec![key("space")]], false);
        let mut monitor = ResponseMonitor::new(source);
        let responses = monitor.run(0.02).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].label, "space");
        assert!(responses[0].at_secs <= 0.02 + 0.01);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn simultaneous_keys_are_discarded() {
        let (source, _, _) = scripted(vec![vec![key("a"), key("b")]], false);
        let mut monitor = ResponseMonitor::new(source);
        let responses = monitor.run(0.02).unwrap();
        assert!(responses.is_empty());
    }

    #[test]
    fn wait_runs_to_full_duration() {
        let (source, _, _) = scripted(vec![], false);
        let mut monitor = ResponseMonitor::new(source);
        let clock = Clock::new();
        monitor.run(0.03).unwrap();
        assert!(clock.elapsed_secs() >= 0.03);
    }

    #[test]
    fn source_is_stopped_when_a_poll_fails() {
        let (source, started, stopped) = scripted(vec![], true);
        let mut monitor = ResponseMonitor::new(source);
        let result = monitor.run(0.02);
        assert!(result.is_err());
        assert!(started.load(Ordering::SeqCst));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn non_positive_duration_returns_immediately() {
        let (source, started, _) = scripted(vec![], false);
        let mut monitor = ResponseMonitor::new(source);
        assert!(monitor.run(0.0).unwrap().is_empty());
        assert!(monitor.run(-1.0).unwrap().is_empty());
        // never started for a zero-length wait
        assert!(!started.load(Ordering::SeqCst));
    }
}
