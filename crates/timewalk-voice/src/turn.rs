//! Turn-taking for conversational flow
//!
//! Decides when the user has finished speaking from the recognizer's
//! inactivity estimates instead of a fixed silence gap. Text fragments
//! accumulate into a pending turn; a step whose best long-horizon estimate
//! crosses the threshold marks the turn "ready", and the turn fires once it
//! has stayed ready for the debounce period. Any new fragment cancels
//! readiness.
//!
//! The detector is a plain state machine: time is passed in, nothing is
//! spawned. The session loop drives it and sleeps until [`TurnDetector::deadline`].

use crate::config::TurnConfig;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// One inactivity estimate from a recognizer step.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct InactivityEstimate {
    /// Look-ahead horizon in seconds
    pub horizon_s: f32,
    /// Probability the speaker stays silent over that horizon
    pub inactivity_prob: f32,
}

/// Accumulates a pending user turn and decides when it is complete.
#[derive(Debug)]
pub struct TurnDetector {
    config: TurnConfig,
    pending: String,
    ready: bool,
    ready_since: Option<Instant>,
    last_interrupt: Option<Instant>,
}

impl TurnDetector {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            pending: String::new(),
            ready: false,
            ready_since: None,
            last_interrupt: None,
        }
    }

    /// Append a recognized fragment. The user is still talking, so any
    /// readiness is cancelled.
    pub fn on_fragment(&mut self, text: &str, _now: Instant) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.pending.is_empty() {
            self.pending.push(' ');
        }
        self.pending.push_str(text);
        if self.ready {
            debug!(target: "timewalk::turn", "new fragment, readiness cancelled");
        }
        self.ready = false;
        self.ready_since = None;
    }

    /// Feed one step of inactivity estimates. Returns whether the turn is now ready.
    ///
    /// Horizons below `min_horizon_s` are ignored; a step with none left
    /// changes nothing.
    pub fn on_step(&mut self, estimates: &[InactivityEstimate], now: Instant) -> bool {
        let best = estimates
            .iter()
            .filter(|e| e.horizon_s >= self.config.min_horizon_s)
            .map(|e| e.inactivity_prob)
            .fold(None, |acc: Option<f32>, p| Some(acc.map_or(p, |a| a.max(p))));

        let Some(best) = best else {
            return self.ready;
        };

        if best > self.config.inactivity_threshold && !self.pending.trim().is_empty() && !self.ready {
            debug!(target: "timewalk::turn", prob = best, "turn ready");
            self.ready = true;
            self.ready_since = Some(now);
        }
        self.ready
    }

    /// Record that the user barged in. Lengthens the debounce for a while.
    pub fn note_interrupt(&mut self, now: Instant) {
        self.last_interrupt = Some(now);
    }

    /// Debounce in effect at `now`.
    pub fn effective_debounce(&self, now: Instant) -> Duration {
        match self.last_interrupt {
            Some(at) if now.saturating_duration_since(at) < self.config.post_interrupt_window() => {
                self.config.post_interrupt_debounce()
            }
            _ => self.config.debounce(),
        }
    }

    /// When the pending turn will fire if nothing else arrives.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.ready {
            return None;
        }
        let since = self.ready_since?;
        Some(since + self.effective_debounce(since))
    }

    /// Fire the turn if it has been ready for the debounce period.
    ///
    /// Takes the pending text and resets readiness in one step, so a turn
    /// fires at most once.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if !self.ready {
            return None;
        }
        let since = self.ready_since?;
        if now.saturating_duration_since(since) < self.effective_debounce(now) {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        self.ready = false;
        self.ready_since = None;
        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }
        info!(target: "timewalk::turn", "🎯 Turn complete: {:?}", text);
        Some(text)
    }

    /// Drop the pending turn.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.ready = false;
        self.ready_since = None;
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn est(horizon_s: f32, inactivity_prob: f32) -> InactivityEstimate {
        InactivityEstimate {
            horizon_s,
            inactivity_prob,
        }
    }

    #[test]
    fn fires_after_debounce() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());

        d.on_fragment("I want to see", t0);
        d.on_fragment("ancient Rome", t0 + Duration::from_millis(200));
        assert!(d.on_step(&[est(2.0, 0.85)], t0 + Duration::from_millis(300)));

        assert_eq!(d.poll(t0 + Duration::from_millis(700)), None);
        assert_eq!(
            d.poll(t0 + Duration::from_millis(800)).as_deref(),
            Some("I want to see ancient Rome")
        );
        assert_eq!(d.pending(), "");
        assert_eq!(d.poll(t0 + Duration::from_millis(2000)), None);
    }

    #[test]
    fn short_horizons_are_ignored() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());
        d.on_fragment("hello", t0);
        assert!(!d.on_step(&[est(0.5, 0.99), est(1.0, 0.95)], t0));
        assert_eq!(d.deadline(), None);
    }

    #[test]
    fn uses_max_over_qualifying_horizons() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());
        d.on_fragment("hello", t0);
        assert!(d.on_step(&[est(0.5, 0.1), est(2.0, 0.3), est(3.0, 0.8)], t0));
    }

    #[test]
    fn new_fragment_cancels_readiness() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());
        d.on_fragment("take me to", t0);
        assert!(d.on_step(&[est(2.0, 0.9)], t0));
        d.on_fragment("Kyoto", t0 + Duration::from_millis(300));
        assert!(!d.is_ready());
        assert_eq!(d.poll(t0 + Duration::from_secs(5)), None);
        assert_eq!(d.pending(), "take me to Kyoto");
    }

    #[test]
    fn empty_buffer_never_becomes_ready() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());
        assert!(!d.on_step(&[est(2.0, 0.99)], t0));
        assert_eq!(d.poll(t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn longer_debounce_after_interrupt() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());
        d.note_interrupt(t0);
        d.on_fragment("wait, actually", t0);
        d.on_step(&[est(2.0, 0.9)], t0);

        assert_eq!(d.deadline(), Some(t0 + Duration::from_millis(1200)));
        assert_eq!(d.poll(t0 + Duration::from_millis(600)), None);
        assert_eq!(
            d.poll(t0 + Duration::from_millis(1200)).as_deref(),
            Some("wait, actually")
        );

        let later = t0 + Duration::from_secs(10);
        assert_eq!(d.effective_debounce(later), Duration::from_millis(500));
    }

    #[test]
    fn reset_drops_pending_turn() {
        let t0 = Instant::now();
        let mut d = TurnDetector::new(TurnConfig::default());
        d.on_fragment("half a sentence", t0);
        d.on_step(&[est(2.0, 0.9)], t0);
        d.reset();
        assert_eq!(d.pending(), "");
        assert_eq!(d.poll(t0 + Duration::from_secs(1)), None);
    }
}
