//! Timeout supervision
//!
//! A supervisor polls for the end of a transaction. Every time the current
//! threshold passes without a response it asks a [`UserDecision`] whether to
//! keep waiting; if so the threshold doubles, otherwise the transaction is
//! given up. It only stops observing; a pending transport read is never
//! interrupted.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{ProtocolConfig, ProtocolError};

/// Decides what happens when a response is late, and hears how it ended
pub trait UserDecision: Send + Sync {
    /// The threshold of `elapsed_ms` passed on timeout number `attempt`.
    /// Return `true` to keep waiting twice as long.
    fn continue_after_timeout(&self, elapsed_ms: u64, attempt: u32) -> bool;

    /// The response arrived
    fn on_completed(&self, message: &str);

    /// Waiting was given up
    fn on_aborted(&self, message: &str);
}

/// The transaction a supervisor watches
pub trait Watch {
    /// Whether the transaction has finished and its outcome was reported
    fn is_ended(&self) -> bool;

    /// Stop accepting input for the transaction. Returns `false` when it
    /// finished first and can no longer be given up.
    fn abandon(&self) -> bool;
}

impl<F: Fn() -> bool> Watch for F {
    fn is_ended(&self) -> bool {
        self()
    }

    fn abandon(&self) -> bool {
        !self()
    }
}

/// Escalating timeout threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutState {
    threshold: Duration,
    attempt: u32,
}

impl TimeoutState {
    /// Start at the base threshold, first attempt
    pub fn new(base: Duration) -> Self {
        Self {
            threshold: base,
            attempt: 1,
        }
    }

    /// Current threshold
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Number of the timeout that fires next
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether `elapsed` has reached the threshold
    pub fn is_breached(&self, elapsed: Duration) -> bool {
        elapsed >= self.threshold
    }

    /// Keep waiting: double the threshold
    pub fn escalate(&mut self) {
        self.threshold = self.threshold.saturating_mul(2);
        self.attempt += 1;
    }
}

/// How a supervised transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The transaction ended before waiting was given up
    Completed { elapsed: Duration, timeouts: u32 },
    /// The decision declined to keep waiting
    Aborted { elapsed: Duration, timeouts: u32 },
}

/// Polls a transaction for completion and escalates its timeout
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    base_timeout: Duration,
    poll_interval: Duration,
}

impl TimeoutSupervisor {
    /// Create a supervisor with explicit timing
    pub fn new(base_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            base_timeout,
            poll_interval,
        }
    }

    /// Create a supervisor from the link configuration
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.base_timeout(), config.poll_interval())
    }

    /// Poll until `watch` reports the end or the decision gives up.
    ///
    /// `started` is the moment the request went out. Completion is checked
    /// before the threshold on every tick. A transaction that finishes while
    /// the decision is pending is reported as completed even if the answer
    /// was to stop.
    pub fn run(
        &self,
        started: Instant,
        watch: &dyn Watch,
        decision: &dyn UserDecision,
    ) -> SupervisorOutcome {
        let mut state = TimeoutState::new(self.base_timeout);

        loop {
            if watch.is_ended() {
                return Self::completed(started, state.attempt() - 1, decision);
            }

            let elapsed = started.elapsed();
            if state.is_breached(elapsed) {
                let threshold_ms = state.threshold().as_millis() as u64;
                debug!(
                    "timeout {} reached at {} ms, asking whether to continue",
                    state.attempt(),
                    threshold_ms
                );

                if decision.continue_after_timeout(threshold_ms, state.attempt()) {
                    state.escalate();
                    debug!("waiting until {} ms", state.threshold().as_millis());
                    continue;
                }

                if !watch.abandon() {
                    debug!("transaction finished while the decision was pending");
                    while !watch.is_ended() {
                        thread::sleep(self.poll_interval);
                    }
                    return Self::completed(started, state.attempt(), decision);
                }

                let elapsed = started.elapsed();
                let message = ProtocolError::TimeoutAborted {
                    elapsed_ms: elapsed.as_millis() as u64,
                    attempts: state.attempt(),
                }
                .to_string();
                warn!("{}", message);
                decision.on_aborted(&message);
                return SupervisorOutcome::Aborted {
                    elapsed,
                    timeouts: state.attempt(),
                };
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn completed(
        started: Instant,
        timeouts: u32,
        decision: &dyn UserDecision,
    ) -> SupervisorOutcome {
        let elapsed = started.elapsed();
        let message = format!("Transmission ended at t = {} ms.", elapsed.as_millis());
        info!("{}", message);
        decision.on_completed(&message);
        SupervisorOutcome::Completed { elapsed, timeouts }
    }

    /// Run on a dedicated thread. `on_exit` sees the outcome before the
    /// thread finishes.
    pub fn spawn<W, X>(
        self,
        started: Instant,
        watch: W,
        decision: std::sync::Arc<dyn UserDecision>,
        on_exit: X,
    ) -> JoinHandle<SupervisorOutcome>
    where
        W: Watch + Send + 'static,
        X: FnOnce(SupervisorOutcome) + Send + 'static,
    {
        thread::spawn(move || {
            let outcome = self.run(started, &watch, decision.as_ref());
            on_exit(outcome);
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedDecision {
        answers: Mutex<Vec<bool>>,
        asked: Mutex<Vec<(u64, u32)>>,
        completed: Mutex<Vec<String>>,
        aborted: Mutex<Vec<String>>,
    }

    impl ScriptedDecision {
        fn answering(answers: &[bool]) -> Self {
            let decision = Self::default();
            *decision.answers.lock().unwrap() = answers.iter().rev().copied().collect();
            decision
        }
    }

    impl UserDecision for ScriptedDecision {
        fn continue_after_timeout(&self, elapsed_ms: u64, attempt: u32) -> bool {
            self.asked.lock().unwrap().push((elapsed_ms, attempt));
            self.answers.lock().unwrap().pop().unwrap_or(false)
        }

        fn on_completed(&self, message: &str) {
            self.completed.lock().unwrap().push(message.to_string());
        }

        fn on_aborted(&self, message: &str) {
            self.aborted.lock().unwrap().push(message.to_string());
        }
    }

    fn fast_supervisor() -> TimeoutSupervisor {
        TimeoutSupervisor::new(Duration::from_millis(20), Duration::from_millis(2))
    }

    #[test]
    fn test_timeout_state_doubles() {
        let mut state = TimeoutState::new(Duration::from_millis(2000));
        assert!(!state.is_breached(Duration::from_millis(1999)));
        assert!(state.is_breached(Duration::from_millis(2000)));
        state.escalate();
        assert_eq!(state.threshold(), Duration::from_millis(4000));
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn test_completion_before_threshold_asks_nothing() {
        let decision = ScriptedDecision::default();
        let outcome = fast_supervisor().run(Instant::now(), &|| true, &decision);

        assert!(matches!(
            outcome,
            SupervisorOutcome::Completed { timeouts: 0, .. }
        ));
        assert!(decision.asked.lock().unwrap().is_empty());
        assert_eq!(decision.completed.lock().unwrap().len(), 1);
        assert!(decision.completed.lock().unwrap()[0].starts_with("Transmission ended at t = "));
    }

    #[test]
    fn test_stop_aborts() {
        let decision = ScriptedDecision::answering(&[false]);
        let outcome = fast_supervisor().run(Instant::now(), &|| false, &decision);

        assert!(matches!(
            outcome,
            SupervisorOutcome::Aborted { timeouts: 1, .. }
        ));
        assert_eq!(*decision.asked.lock().unwrap(), vec![(20, 1)]);
        assert_eq!(decision.aborted.lock().unwrap().len(), 1);
        assert!(decision.completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_threshold_doubles_on_continue() {
        let decision = ScriptedDecision::answering(&[true, true, false]);
        let outcome = fast_supervisor().run(Instant::now(), &|| false, &decision);

        assert!(matches!(
            outcome,
            SupervisorOutcome::Aborted { timeouts: 3, .. }
        ));
        assert_eq!(
            *decision.asked.lock().unwrap(),
            vec![(20, 1), (40, 2), (80, 3)]
        );
        if let SupervisorOutcome::Aborted { elapsed, .. } = outcome {
            assert!(elapsed >= Duration::from_millis(80));
        }
    }

    #[test]
    fn test_completion_during_decision_wins_over_stop() {
        let decision = ScriptedDecision::answering(&[false]);
        let outcome = fast_supervisor().run(
            Instant::now(),
            &|| !decision.asked.lock().unwrap().is_empty(),
            &decision,
        );

        assert!(matches!(
            outcome,
            SupervisorOutcome::Completed { timeouts: 1, .. }
        ));
        assert_eq!(decision.completed.lock().unwrap().len(), 1);
        assert!(decision.aborted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_completion_after_one_timeout() {
        let ended = Arc::new(AtomicBool::new(false));
        let decision = Arc::new(ScriptedDecision::answering(&[true; 8]));
        let probe = ended.clone();
        let flag = ended.clone();

        let handle = fast_supervisor().spawn(
            Instant::now(),
            move || probe.load(Ordering::SeqCst),
            decision.clone(),
            |_| {},
        );

        // Let the first threshold pass, then complete before the doubled one
        while decision.asked.lock().unwrap().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        flag.store(true, Ordering::SeqCst);

        let outcome = handle.join().unwrap();
        match outcome {
            SupervisorOutcome::Completed { timeouts, .. } => assert!(timeouts >= 1),
            other => panic!("Expected completion, got {:?}", other),
        }
        assert_eq!(decision.completed.lock().unwrap().len(), 1);
    }
}
