//! Activity classification over sampled screen snapshots.
//!
//! The tracker keeps a bounded ring of recent samples and classifies the
//! agent as initializing, stable, or changing by comparing snapshot texts
//! across the stability window. Termination is sticky.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::screen::ScreenSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Initializing,
    Stable,
    Changing,
    Terminated,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Stable => "stable",
            Self::Changing => "changing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerParams {
    pub sampling_period: Duration,
    pub stability_window: Duration,
    pub startup_quiet: Duration,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            sampling_period: Duration::from_millis(25),
            stability_window: Duration::from_millis(250),
            startup_quiet: Duration::from_secs(1),
        }
    }
}

impl TrackerParams {
    /// Consecutive equal samples required to call the screen stable.
    pub fn window_samples(&self) -> usize {
        let period = self.sampling_period.as_millis().max(1);
        self.stability_window.as_millis().div_ceil(period) as usize
    }

    fn ring_capacity(&self) -> usize {
        self.window_samples() + 2
    }
}

#[derive(Debug, Clone)]
struct Sample {
    at: Instant,
    text: String,
}

/// Outcome of one tracker tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerTick {
    pub status: AgentStatus,
    pub status_changed: bool,
    /// True when the snapshot text differs from the previously observed one.
    pub text_changed: bool,
}

pub struct ScreenTracker {
    params: TrackerParams,
    started: Instant,
    ring: VecDeque<Sample>,
    status: AgentStatus,
    last_text: Option<String>,
}

impl ScreenTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            started: Instant::now(),
            ring: VecDeque::with_capacity(params.ring_capacity()),
            status: AgentStatus::Initializing,
            last_text: None,
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Record one snapshot sample and reclassify.
    pub fn observe(&mut self, snapshot: &ScreenSnapshot, now: Instant) -> TrackerTick {
        if self.status == AgentStatus::Terminated {
            return TrackerTick {
                status: AgentStatus::Terminated,
                status_changed: false,
                text_changed: false,
            };
        }

        let text_changed = self.last_text.as_deref() != Some(snapshot.text.as_str());
        if text_changed {
            self.last_text = Some(snapshot.text.clone());
        }

        self.ring.push_back(Sample {
            at: now,
            text: snapshot.text.clone(),
        });
        while self.ring.len() > self.params.ring_capacity() {
            self.ring.pop_front();
        }

        let next = self.classify(now);
        let status_changed = next != self.status;
        self.status = next;
        TrackerTick {
            status: next,
            status_changed,
            text_changed,
        }
    }

    fn classify(&self, now: Instant) -> AgentStatus {
        if now.duration_since(self.started) < self.params.startup_quiet {
            return AgentStatus::Initializing;
        }

        let needed = self.params.window_samples();
        if self.ring.len() < needed {
            return AgentStatus::Changing;
        }

        // Cursor moves are not part of the sample text, so they never break
        // stability; only the canonicalized text is compared.
        let mut recent = self.ring.iter().rev().take(needed);
        let newest = match recent.next() {
            Some(sample) => &sample.text,
            None => return AgentStatus::Changing,
        };
        if recent.all(|sample| sample.text == *newest) {
            AgentStatus::Stable
        } else {
            AgentStatus::Changing
        }
    }

    /// Mark the agent terminated. Returns true on the transition.
    pub fn mark_terminated(&mut self) -> bool {
        if self.status == AgentStatus::Terminated {
            return false;
        }
        self.status = AgentStatus::Terminated;
        true
    }

    /// A resize invalidates the sample history: the ring is cleared and the
    /// next observation classifies as `changing` until the window refills.
    /// The transition itself is reported by that observation, so it reaches
    /// subscribers like any other status change.
    pub fn note_resize(&mut self) {
        self.ring.clear();
        self.last_text = None;
    }

    /// Oldest sample age, exposed for diagnostics.
    pub fn sample_span(&self, now: Instant) -> Option<Duration> {
        self.ring.front().map(|s| now.duration_since(s.at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(text: &str) -> ScreenSnapshot {
        ScreenSnapshot {
            text: text.to_string(),
            cursor_row: 0,
            cursor_col: 0,
        }
    }

    fn params() -> TrackerParams {
        TrackerParams {
            sampling_period: Duration::from_millis(25),
            stability_window: Duration::from_millis(250),
            startup_quiet: Duration::from_secs(1),
        }
    }

    /// Drive `count` ticks of the same text starting at `offset` past start.
    fn drive(
        tracker: &mut ScreenTracker,
        text: &str,
        offset: Duration,
        count: usize,
    ) -> TrackerTick {
        let mut last = None;
        for i in 0..count {
            let now = tracker.started() + offset + Duration::from_millis(25 * i as u64);
            last = Some(tracker.observe(&snap(text), now));
        }
        last.expect("at least one tick")
    }

    #[test]
    fn quiet_window_is_initializing_even_when_stable() {
        let mut tracker = ScreenTracker::new(params());
        let tick = drive(&mut tracker, "> ", Duration::ZERO, 20);
        assert_eq!(tick.status, AgentStatus::Initializing);
    }

    #[test]
    fn stable_after_quiet_window_and_full_ring() {
        let mut tracker = ScreenTracker::new(params());
        drive(&mut tracker, "> ", Duration::ZERO, 20);
        let tick = drive(&mut tracker, "> ", Duration::from_millis(1100), 10);
        assert_eq!(tick.status, AgentStatus::Stable);
    }

    #[test]
    fn empty_snapshots_count_toward_stability() {
        let mut tracker = ScreenTracker::new(params());
        let tick = drive(&mut tracker, "", Duration::from_millis(1100), 12);
        assert_eq!(tick.status, AgentStatus::Stable);
    }

    #[test]
    fn text_change_flips_to_changing() {
        let mut tracker = ScreenTracker::new(params());
        drive(&mut tracker, "a", Duration::from_millis(1100), 12);
        let now = tracker.started() + Duration::from_millis(1500);
        let tick = tracker.observe(&snap("ab"), now);
        assert_eq!(tick.status, AgentStatus::Changing);
        assert!(tick.status_changed);
        assert!(tick.text_changed);
    }

    #[test]
    fn returns_to_stable_after_window_of_equal_samples() {
        let mut tracker = ScreenTracker::new(params());
        drive(&mut tracker, "a", Duration::from_millis(1100), 12);
        drive(&mut tracker, "ab", Duration::from_millis(1500), 1);
        let tick = drive(&mut tracker, "ab", Duration::from_millis(1525), 10);
        assert_eq!(tick.status, AgentStatus::Stable);
    }

    #[test]
    fn text_changed_dedupes_equal_samples() {
        let mut tracker = ScreenTracker::new(params());
        let t0 = tracker.started() + Duration::from_millis(1100);
        let first = tracker.observe(&snap("x"), t0);
        let second = tracker.observe(&snap("x"), t0 + Duration::from_millis(25));
        assert!(first.text_changed);
        assert!(!second.text_changed);
    }

    #[test]
    fn cursor_move_does_not_break_stability() {
        let mut tracker = ScreenTracker::new(params());
        drive(&mut tracker, "same", Duration::from_millis(1100), 12);
        let now = tracker.started() + Duration::from_millis(1500);
        let moved = ScreenSnapshot {
            text: "same".to_string(),
            cursor_row: 5,
            cursor_col: 7,
        };
        let tick = tracker.observe(&moved, now);
        assert_eq!(tick.status, AgentStatus::Stable);
        assert!(!tick.text_changed);
    }

    #[test]
    fn terminated_is_sticky() {
        let mut tracker = ScreenTracker::new(params());
        assert!(tracker.mark_terminated());
        assert!(!tracker.mark_terminated());
        let now = tracker.started() + Duration::from_secs(5);
        let tick = tracker.observe(&snap("anything"), now);
        assert_eq!(tick.status, AgentStatus::Terminated);
        assert!(!tick.status_changed);
    }

    #[test]
    fn resize_clears_ring_and_transitions_to_changing() {
        let mut tracker = ScreenTracker::new(params());
        drive(&mut tracker, "a", Duration::from_millis(1100), 12);
        assert_eq!(tracker.status(), AgentStatus::Stable);
        tracker.note_resize();
        // One sample is not enough to be stable again, and the transition is
        // observable.
        let now = tracker.started() + Duration::from_millis(2000);
        let tick = tracker.observe(&snap("a"), now);
        assert_eq!(tick.status, AgentStatus::Changing);
        assert!(tick.status_changed);

        let tick = drive(&mut tracker, "a", Duration::from_millis(2025), 10);
        assert_eq!(tick.status, AgentStatus::Stable);
    }

    #[test]
    fn window_samples_matches_defaults() {
        assert_eq!(TrackerParams::default().window_samples(), 10);
    }
}
