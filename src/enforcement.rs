//! Tiered enforcement derived from the cumulative score.
//!
//! Tiers are conceptual, never stored: the cumulative score is compared
//! against thresholds after each delta. An action fires only when the tier
//! newly increases. Decay lets a dormant identity drift back down.

use serde::{Deserialize, Serialize};

use crate::actions::ActionKind;
use crate::config::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Clean,
    Warned,
    Muted,
    Banned,
}

impl Tier {
    pub fn for_score(score: i64, thresholds: &Thresholds) -> Self {
        if score >= thresholds.ban {
            Tier::Banned
        } else if score >= thresholds.mute {
            Tier::Muted
        } else if score >= thresholds.warn {
            Tier::Warned
        } else {
            Tier::Clean
        }
    }

    /// Outbound action executed when this tier is newly entered.
    pub fn action(self) -> Option<ActionKind> {
        match self {
            Tier::Clean => None,
            Tier::Warned => Some(ActionKind::Notify),
            Tier::Muted => Some(ActionKind::Restrict),
            Tier::Banned => Some(ActionKind::Remove),
        }
    }
}

/// Points removed from a cumulative score after `elapsed_secs` of
/// inactivity: one `step` per full interval, saturating at the score.
pub fn decay_points(elapsed_secs: i64, interval_secs: i64, step: i64) -> i64 {
    if elapsed_secs <= 0 || interval_secs <= 0 || step <= 0 {
        return 0;
    }
    (elapsed_secs / interval_secs).saturating_mul(step)
}

/// Result of merging a delta into the cumulative score.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub old_score: i64,
    pub new_score: i64,
    pub old_tier: Tier,
    pub new_tier: Tier,
}

impl Transition {
    pub fn evaluate(old_score: i64, new_score: i64, thresholds: &Thresholds) -> Self {
        Self {
            old_score,
            new_score,
            old_tier: Tier::for_score(old_score, thresholds),
            new_tier: Tier::for_score(new_score, thresholds),
        }
    }

    /// The action to execute, if a boundary was newly crossed upward.
    pub fn crossed_action(&self) -> Option<ActionKind> {
        if self.new_tier > self.old_tier {
            self.new_tier.action()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_map_to_default_thresholds() {
        let t = Thresholds::default();
        assert_eq!(Tier::for_score(0, &t), Tier::Clean);
        assert_eq!(Tier::for_score(30, &t), Tier::Warned);
        assert_eq!(Tier::for_score(60, &t), Tier::Muted);
        assert_eq!(Tier::for_score(100, &t), Tier::Banned);
    }

    #[test]
    fn action_only_on_upward_crossing() {
        let t = Thresholds::default();
        let up = Transition::evaluate(25, 35, &t);
        assert_eq!(up.crossed_action(), Some(ActionKind::Notify));

        // Already warned, still warned: no duplicate action.
        let flat = Transition::evaluate(35, 45, &t);
        assert_eq!(flat.crossed_action(), None);

        // Decay dropped the tier: silent.
        let down = Transition::evaluate(65, 20, &t);
        assert_eq!(down.crossed_action(), None);

        let jump = Transition::evaluate(0, 120, &t);
        assert_eq!(jump.crossed_action(), Some(ActionKind::Remove));
    }

    #[test]
    fn decay_is_linear_per_full_interval() {
        assert_eq!(decay_points(0, 3600, 5), 0);
        assert_eq!(decay_points(3599, 3600, 5), 0);
        assert_eq!(decay_points(3600, 3600, 5), 5);
        assert_eq!(decay_points(7300, 3600, 5), 10);
    }
}
