//! Event pipeline: the ordered guard chain.
//!
//! Precedence is explicit and fixed: override, then shadowban, then the
//! activation gate and patrol flag, then the scorer and state machine.
//! Each stage may short-circuit; nothing later re-evaluates an earlier
//! stage's decision.

use std::sync::Arc;

use crate::actions::{ActionKind, ActionRecord, ActionSink};
use crate::config::Settings;
use crate::enforcement::{decay_points, Transition};
use crate::errors::EngineResult;
use crate::event::{reason, ModerationEvent};
use crate::profile::OverrideKind;
use crate::reputation::ReputationProvider;
use crate::scorer::{RiskScorer, ScoreContext};
use crate::store::ProfileStore;

/// What the pipeline decided for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Counters updated, no enforcement.
    Recorded,
    /// Shadowbanned identity; contribution silently dropped.
    Discarded,
    /// Gate locked or patrol stood down; telemetry only.
    Suppressed,
    /// Scored; action taken if a tier boundary was newly crossed.
    Scored {
        score: i64,
        action: Option<ActionKind>,
    },
    /// Override decided the outcome.
    Overridden { action: ActionKind },
}

pub struct Engine<R: ReputationProvider, S: ActionSink> {
    store: Arc<ProfileStore>,
    scorer: RiskScorer,
    reputation: Arc<R>,
    sink: S,
    settings: Settings,
}

impl<R: ReputationProvider, S: ActionSink> Engine<R, S> {
    pub fn new(
        store: Arc<ProfileStore>,
        reputation: Arc<R>,
        sink: S,
        settings: Settings,
    ) -> Self {
        Self {
            scorer: RiskScorer::new(&settings),
            store,
            reputation,
            sink,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    /// Drive one inbound event through the guard chain.
    ///
    /// Storage failures surface as errors; the caller logs them and
    /// treats the event as "no action taken" — it is never replayed.
    pub async fn process_event(&self, event: &ModerationEvent) -> EngineResult<Outcome> {
        let group_state = self.store.read_group_state(event.group_id)?;
        let enforcement_enabled = group_state.enforcement_enabled();

        // Stage 1: overrides outrank everything computed.
        let override_kind = self.store.override_kind(event.identity_id)?;
        if override_kind == Some(OverrideKind::ForceBan) {
            self.store.touch_seen(event.identity_id, event.timestamp).await?;
            self.sink.execute(&ActionRecord::new(
                ActionKind::Remove,
                event.identity_id,
                event.group_id,
                0,
                vec![reason::OVERRIDE_FORCE_BAN.to_string()],
            ))?;
            tracing::info!(
                identity_id = event.identity_id,
                group_id = event.group_id,
                "force-ban override applied"
            );
            return Ok(Outcome::Overridden {
                action: ActionKind::Remove,
            });
        }
        // Allow: scoring continues, the resulting action is capped later.
        let allow_override = override_kind == Some(OverrideKind::Allow);

        // Stage 2: shadowban bypasses scoring entirely.
        if let Some(profile) = self.store.read_profile(event.identity_id)? {
            if profile.shadowbanned {
                self.store.touch_seen(event.identity_id, event.timestamp).await?;
                if enforcement_enabled {
                    self.sink.execute(&ActionRecord::new(
                        ActionKind::Discard,
                        event.identity_id,
                        event.group_id,
                        profile.score,
                        vec![reason::SHADOWBAN.to_string()],
                    ))?;
                    self.bump_action_counters(event.identity_id, ActionKind::Discard)
                        .await?;
                }
                tracing::debug!(
                    identity_id = event.identity_id,
                    "discarding event from shadowbanned identity"
                );
                return Ok(Outcome::Discarded);
            }
        }

        // Telemetry is captured regardless of the gate.
        let profile = self.store.record_event(event, &self.settings).await?;

        // Stage 3: activation gate / patrol standdown.
        if !enforcement_enabled {
            tracing::debug!(
                group_id = event.group_id,
                locked = group_state.locked,
                patrol = group_state.patrol,
                "enforcement suppressed, telemetry recorded"
            );
            return Ok(Outcome::Suppressed);
        }

        // Stage 4: scorer and state machine. Joins consult the external
        // reputation service (bounded timeout, cached); messages never
        // block on it.
        let reputation = if event.is_join {
            Some(self.reputation.check(event.identity_id).await)
        } else {
            None
        };
        let ctx = ScoreContext {
            watchlist_hit: self.store.in_watchlist(event.identity_id)?.is_some(),
            reputation,
        };
        let thresholds = group_state
            .thresholds
            .unwrap_or(self.settings.thresholds);
        let assessment = self.scorer.evaluate(event, &profile, &ctx, &thresholds);

        let decay = if profile.last_scored_ts > 0 {
            decay_points(
                event.timestamp - profile.last_scored_ts,
                self.settings.decay_interval_secs,
                self.settings.decay_step_points,
            )
        } else {
            0
        };
        let applied_delta = assessment.delta - decay;
        let (old, new) = self
            .store
            .apply_score_delta(
                event.identity_id,
                applied_delta,
                assessment.floor,
                event.timestamp,
            )
            .await?;

        let transition = Transition::evaluate(old, new, &thresholds);
        let mut action = transition.crossed_action();
        if allow_override {
            action = match action {
                Some(ActionKind::Restrict) | Some(ActionKind::Remove) => Some(ActionKind::Notify),
                other => other,
            };
        }

        if let Some(kind) = action {
            let mut codes: Vec<String> =
                assessment.reasons.iter().map(|r| r.to_string()).collect();
            if allow_override {
                codes.push(reason::OVERRIDE_ALLOW.to_string());
            }
            let record =
                ActionRecord::new(kind, event.identity_id, event.group_id, new, codes);
            self.sink.execute(&record)?;
            self.bump_action_counters(event.identity_id, kind).await?;
            tracing::info!(
                identity_id = event.identity_id,
                group_id = event.group_id,
                score = new,
                action = ?kind,
                reasons = ?assessment.reasons,
                "enforcement action executed"
            );
        }

        Ok(Outcome::Scored { score: new, action })
    }

    async fn bump_action_counters(
        &self,
        identity_id: i64,
        kind: ActionKind,
    ) -> EngineResult<()> {
        self.store
            .update_profile(identity_id, |profile| match kind {
                ActionKind::Notify => profile.warnings += 1,
                ActionKind::Discard => profile.deletions += 1,
                ActionKind::Restrict | ActionKind::Remove => {}
            })
            .await
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
