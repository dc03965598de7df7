//! Heuristic risk scoring for live events.
//!
//! Deterministic and stateless given its inputs: every matching rule adds
//! its delta independently, then floor rules raise the resulting
//! cumulative score to a minimum via `max` — floors never stack.

use crate::config::{Settings, Thresholds};
use crate::event::{reason, ModerationEvent};
use crate::profile::IdentityProfile;
use crate::reputation::ReputationVerdict;

/// Margin above the ban threshold used by the reputation floor, so a
/// flagged identity lands firmly in the ban tier.
const REPUTATION_FLOOR_MARGIN: i64 = 20;

#[derive(Debug, Clone, Default)]
pub struct RiskAssessment {
    /// Additive delta from the rule table.
    pub delta: i64,
    /// Minimum the resulting cumulative score is raised to, if any.
    pub floor: Option<i64>,
    pub reasons: Vec<&'static str>,
}

impl RiskAssessment {
    fn add(&mut self, points: i64, code: &'static str) {
        self.delta += points;
        if !self.reasons.contains(&code) {
            self.reasons.push(code);
        }
    }

    fn floor_at(&mut self, minimum: i64, code: &'static str) {
        self.floor = Some(self.floor.map_or(minimum, |f| f.max(minimum)));
        if !self.reasons.contains(&code) {
            self.reasons.push(code);
        }
    }
}

/// Inputs gathered by the engine before scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreContext {
    pub watchlist_hit: bool,
    pub reputation: Option<ReputationVerdict>,
}

pub struct RiskScorer {
    flood_window_secs: i64,
    flood_event_threshold: usize,
    repeat_window_secs: i64,
    blacklisted_keywords: Vec<String>,
    blacklisted_domains: Vec<String>,
}

impl RiskScorer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            flood_window_secs: settings.flood_window_secs,
            flood_event_threshold: settings.flood_event_threshold,
            repeat_window_secs: settings.repeat_window_secs,
            blacklisted_keywords: settings.blacklisted_keywords.clone(),
            blacklisted_domains: settings.blacklisted_domains.clone(),
        }
    }

    /// Score one event against the post-update profile snapshot.
    ///
    /// `profile` must already include this event (counters, window,
    /// hashes) — the scorer reads history, it never mutates it.
    pub fn evaluate(
        &self,
        event: &ModerationEvent,
        profile: &IdentityProfile,
        ctx: &ScoreContext,
        thresholds: &Thresholds,
    ) -> RiskAssessment {
        let mut assessment = RiskAssessment::default();
        let now = event.timestamp;

        let in_window = profile
            .event_window
            .iter()
            .filter(|ts| now - **ts <= self.flood_window_secs)
            .count();
        if in_window >= self.flood_event_threshold {
            assessment.add(20, reason::FLOOD);
        }

        if let Some(hash) = &event.content_hash {
            let repeated = profile
                .recent_hashes
                .iter()
                .rev()
                // Skip the entry recorded for this very event.
                .skip(1)
                .any(|(h, ts)| h == hash && now - *ts <= self.repeat_window_secs);
            if repeated {
                assessment.add(15, reason::REPEAT_CONTENT);
            }
        }

        if event.is_forward && profile.originated() == 0 {
            assessment.add(10, reason::FORWARD_ONLY);
        }

        if event.has_link {
            if profile.on_probation(now) {
                assessment.add(20, reason::PROBATION_LINK);
            } else {
                assessment.add(5, reason::LINK);
            }
        }

        if let Some(text) = &event.text {
            if self.matches_blacklist(text) {
                assessment.add(30, reason::BLACKLIST);
            }
        }

        if ctx.watchlist_hit {
            assessment.floor_at(thresholds.mute, reason::WATCHLIST);
        }
        if ctx.reputation == Some(ReputationVerdict::Flagged) {
            assessment.floor_at(thresholds.ban + REPUTATION_FLOOR_MARGIN, reason::REPUTATION_FLAGGED);
        }

        assessment
    }

    fn matches_blacklist(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.blacklisted_keywords
            .iter()
            .chain(self.blacklisted_domains.iter())
            .any(|term| lowered.contains(&term.to_lowercase()))
    }
}
