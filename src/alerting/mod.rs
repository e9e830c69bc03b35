//! Threshold alerting with hysteresis.
//!
//! A [`ThresholdAlert`] watches one counter in one [`SlidingWindow`] and emits
//! edge-triggered notifications: one message when the observed value crosses
//! the threshold, one when it returns past it, and nothing while the
//! condition merely persists.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::stats::{SlidingWindow, StatsError};

/// Which side of the threshold counts as an alert condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDirection {
    /// Fire while the observed value is at or above the threshold.
    Above,
    /// Fire while the observed value is at or below the threshold.
    Below,
}

impl AlertDirection {
    /// The word used in alert messages for this direction.
    fn condition(self) -> &'static str {
        match self {
            AlertDirection::Above => "High",
            AlertDirection::Below => "Low",
        }
    }
}

/// A hysteresis state machine bound to one window and one counter key.
///
/// State is owned exclusively by whichever task drives [`evaluate`]; alerts
/// observing the same window are fully independent of each other.
///
/// [`evaluate`]: ThresholdAlert::evaluate
#[derive(Debug)]
pub struct ThresholdAlert {
    threshold: i64,
    direction: AlertDirection,
    window: Arc<SlidingWindow>,
    key: String,
    last_fired: Option<DateTime<Utc>>,
}

impl ThresholdAlert {
    /// Creates a quiet alert watching `key` in `window`.
    pub fn new(
        threshold: i64,
        direction: AlertDirection,
        window: Arc<SlidingWindow>,
        key: impl Into<String>,
    ) -> Self {
        Self { threshold, direction, window, key: key.into(), last_fired: None }
    }

    /// Reads the bound counter and runs one evaluation step, returning the
    /// notification message if the alert state changed.
    pub fn evaluate(&mut self) -> Result<Option<String>, StatsError> {
        let observed = self.window.get(&self.key)?;
        Ok(self.transition(observed))
    }

    /// Applies one observed value to the state machine.
    ///
    /// Emits on the quiet-to-firing and firing-to-quiet edges only; both
    /// steady states produce nothing.
    pub fn transition(&mut self, observed: i64) -> Option<String> {
        let firing = match self.direction {
            AlertDirection::Above => observed >= self.threshold,
            AlertDirection::Below => observed <= self.threshold,
        };
        let condition = self.direction.condition();

        match (self.last_fired, firing) {
            (None, true) => {
                let now = Utc::now();
                self.last_fired = Some(now);
                Some(format!(
                    "{condition} traffic generated an alert - hits = {observed}, triggered at {}",
                    now.to_rfc2822()
                ))
            }
            (Some(fired), false) => {
                self.last_fired = None;
                Some(format!(
                    "{condition} traffic alert has recovered - hits = {observed}, last triggered at {}",
                    fired.to_rfc2822()
                ))
            }
            _ => None,
        }
    }

    /// True while the alert condition is active.
    pub fn is_firing(&self) -> bool {
        self.last_fired.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn alert(threshold: i64, direction: AlertDirection) -> ThresholdAlert {
        let window = Arc::new(SlidingWindow::new(NonZeroUsize::new(1).unwrap()));
        ThresholdAlert::new(threshold, direction, window, "all")
    }

    #[test]
    fn transition_table() {
        // (direction, observed, previously firing, expected message prefix,
        //  expected firing afterwards)
        let cases: &[(AlertDirection, i64, bool, &str, bool)] = &[
            (AlertDirection::Above, 9, false, "", false),
            (AlertDirection::Above, 10, false, "High traffic generated an alert", true),
            (AlertDirection::Above, 11, false, "High traffic generated an alert", true),
            (AlertDirection::Below, 9, false, "Low traffic generated an alert", true),
            (AlertDirection::Below, 10, false, "Low traffic generated an alert", true),
            (AlertDirection::Below, 11, false, "", false),
            (AlertDirection::Above, 9, true, "High traffic alert has recovered", false),
            (AlertDirection::Above, 10, true, "", true),
            (AlertDirection::Above, 11, true, "", true),
            (AlertDirection::Below, 9, true, "", true),
            (AlertDirection::Below, 10, true, "", true),
            (AlertDirection::Below, 11, true, "Low traffic alert has recovered", false),
        ];

        for &(direction, observed, previously_firing, prefix, firing_after) in cases {
            let mut alert = alert(10, direction);
            if previously_firing {
                // Drive the machine into the firing state first.
                let arm = match direction {
                    AlertDirection::Above => i64::MAX,
                    AlertDirection::Below => i64::MIN,
                };
                assert!(alert.transition(arm).is_some());
            }

            let message = alert.transition(observed);
            assert_eq!(alert.is_firing(), firing_after, "direction {direction:?}, observed {observed}");
            match message {
                Some(message) => {
                    assert!(!prefix.is_empty(), "unexpected message '{message}'");
                    assert!(
                        message.starts_with(prefix),
                        "expected prefix '{prefix}', got '{message}'"
                    );
                }
                None => assert!(prefix.is_empty(), "expected a message with prefix '{prefix}'"),
            }
        }
    }

    #[test]
    fn sustained_condition_fires_exactly_once() {
        let mut alert = alert(10, AlertDirection::Above);
        assert!(alert.transition(9).is_none());
        assert!(alert.transition(10).is_some());
        assert!(alert.transition(11).is_none());
        assert!(alert.transition(50).is_none());
        let recovered = alert.transition(9).unwrap();
        assert!(recovered.starts_with("High traffic alert has recovered"));
        assert!(alert.transition(8).is_none());
    }

    #[test]
    fn evaluate_reads_the_bound_counter() {
        let window = Arc::new(SlidingWindow::new(NonZeroUsize::new(1).unwrap()));
        let mut alert = ThresholdAlert::new(3, AlertDirection::Above, Arc::clone(&window), "all");

        window.mutate(|set| set.add("all", 2)).unwrap();
        assert!(alert.evaluate().unwrap().is_none());

        window.mutate(|set| set.add("all", 1)).unwrap();
        let message = alert.evaluate().unwrap().unwrap();
        assert!(message.contains("hits = 3"));
        assert!(alert.is_firing());
    }

    #[test]
    fn independent_alerts_on_the_same_window() {
        let window = Arc::new(SlidingWindow::new(NonZeroUsize::new(1).unwrap()));
        let mut high = ThresholdAlert::new(10, AlertDirection::Above, Arc::clone(&window), "all");
        let mut low = ThresholdAlert::new(2, AlertDirection::Below, Arc::clone(&window), "all");

        // An empty window is below the low threshold.
        assert!(high.evaluate().unwrap().is_none());
        assert!(low.evaluate().unwrap().unwrap().starts_with("Low traffic generated"));

        window.mutate(|set| set.add("all", 20)).unwrap();
        assert!(high.evaluate().unwrap().unwrap().starts_with("High traffic generated"));
        assert!(low.evaluate().unwrap().unwrap().starts_with("Low traffic alert has recovered"));
    }
}
