//! Batch re-scoring pass over a group's stored profiles.
//!
//! Walks the store in bounded pages so the live event path is never
//! starved and no store-wide lock is held. `report` is read-only; `clean`
//! additionally kicks deleted-account shells and shadowbans identities at
//! or above the high-risk cutoff. Re-running with no intervening events
//! yields an identical ranked report and no duplicate shadowbans.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::actions::{ActionKind, ActionRecord, ActionSink};
use crate::config::Settings;
use crate::errors::{EngineError, EngineResult};
use crate::event::reason;
use crate::profile::{IdentityProfile, MessageKind};
use crate::store::ProfileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Report,
    Clean,
}

impl std::str::FromStr for SweepMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "clean" => Ok(Self::Clean),
            other => Err(EngineError::config(format!("unknown sweep mode: {other}"))),
        }
    }
}

/// Composite assessment of one stored profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRisk {
    pub identity_id: i64,
    pub display: String,
    pub score: i64,
    pub reasons: Vec<String>,
    pub is_deleted: bool,
    pub watchlist_hit: bool,
}

impl MemberRisk {
    fn add(&mut self, points: i64, why: impl Into<String>) {
        self.score += points;
        let why = why.into();
        if !self.reasons.contains(&why) {
            self.reasons.push(why);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub group_id: i64,
    pub scanned: usize,
    pub deleted_shells: Vec<MemberRisk>,
    pub watchlist_hits: Vec<MemberRisk>,
    /// Ranked by score descending, identity id ascending for stable ties.
    pub high_risk: Vec<MemberRisk>,
    pub silent_watchers: usize,
    pub actions_taken: usize,
    pub shadowbans_applied: usize,
}

impl SweepReport {
    pub fn as_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Sweep report for group {}", self.group_id);
        let _ = writeln!(out, "Members scanned: {}", self.scanned);
        let _ = writeln!(out, "Deleted shells: {}", self.deleted_shells.len());
        let _ = writeln!(out, "Watchlist hits: {}", self.watchlist_hits.len());
        let _ = writeln!(out, "High-risk profiles: {}", self.high_risk.len());
        let _ = writeln!(out, "Silent watchers: {}", self.silent_watchers);
        let _ = writeln!(out, "Actions taken: {}", self.actions_taken);
        let _ = writeln!(out, "Shadowbans applied: {}", self.shadowbans_applied);
        for risk in self.high_risk.iter().take(5) {
            let _ = writeln!(
                out,
                "- {} (score {}): {}",
                risk.display,
                risk.score,
                risk.reasons.join(", ")
            );
        }
        out
    }
}

/// Pure composite scoring of one profile. Deterministic so repeated
/// sweeps over unchanged state rank identically.
pub struct MemberAssessor<'a> {
    settings: &'a Settings,
    now: i64,
}

impl<'a> MemberAssessor<'a> {
    pub fn new(settings: &'a Settings, now: i64) -> Self {
        Self { settings, now }
    }

    fn age_days(&self, first_seen: i64) -> i64 {
        if first_seen <= 0 {
            return 0;
        }
        (self.now - first_seen) / 86_400
    }

    pub fn assess(&self, profile: &IdentityProfile, watchlist_hit: bool) -> MemberRisk {
        let mut risk = MemberRisk {
            identity_id: profile.identity_id,
            display: profile.display(),
            score: 0,
            reasons: Vec::new(),
            is_deleted: profile.is_deleted,
            watchlist_hit,
        };

        if profile.is_deleted {
            risk.reasons.push("deleted account shell".to_string());
            return risk;
        }

        let age_days = self.age_days(profile.first_seen);
        let join_window = self.settings.sweep_join_window_secs;

        if profile.messages_sent == 0 && age_days >= self.settings.sweep_silent_days {
            risk.add(10, format!("silent watcher for {age_days}d"));
        }

        if profile.username.is_none()
            && profile
                .display_name
                .as_deref()
                .map_or(true, |name| !name.contains(' '))
            && age_days >= self.settings.sweep_ghost_days
        {
            risk.add(15, "ghost profile");
        }

        if profile.forwards_sent >= 3 && profile.forwards_sent >= profile.messages_sent {
            risk.add(10, "forward-only activity");
        }

        if profile.first_forward_ts > 0
            && profile.first_forward_ts - profile.first_seen <= join_window
        {
            risk.add(25, "forward-on-join pattern");
        }

        if profile.first_message_ts > 0
            && profile.first_message_kind == Some(MessageKind::Link)
            && profile.first_message_ts - profile.first_seen <= join_window
        {
            risk.add(20, "link dropped right after join");
        }

        if profile.identity_changes >= 3 {
            risk.add(20, "identity morphing");
        }

        if profile.warnings > 0 || profile.deletions > 0 {
            risk.add(30, "prior incidents across groups");
        }

        if watchlist_hit {
            risk.add(80, "externally flagged");
        }

        if profile.shadowbanned {
            risk.add(10, "already shadowbanned");
        }

        risk
    }
}

pub struct SweepEngine {
    store: Arc<ProfileStore>,
    settings: Settings,
    cancelled: Arc<AtomicBool>,
}

impl SweepEngine {
    pub fn new(store: Arc<ProfileStore>, settings: Settings) -> Self {
        Self {
            store,
            settings,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling a long-running sweep cooperatively.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Run one sweep over `group_id`. `limit` bounds the number of
    /// profiles scanned; `sink` receives clean-mode corrective actions.
    pub async fn run(
        &self,
        group_id: i64,
        mode: SweepMode,
        limit: Option<usize>,
        sink: &dyn ActionSink,
    ) -> EngineResult<SweepReport> {
        self.cancelled.store(false, Ordering::Relaxed);
        let assessor = MemberAssessor::new(&self.settings, Utc::now().timestamp());
        let mut report = SweepReport {
            group_id,
            ..SweepReport::default()
        };

        let mut after = None;
        'pages: loop {
            let page = self
                .store
                .profiles_page(after, self.settings.sweep_page_size)?;
            if page.is_empty() {
                break;
            }
            after = page.last().map(|p| p.identity_id);

            for profile in page {
                if self.cancelled.load(Ordering::Relaxed) {
                    return Err(EngineError::SweepAborted {
                        message: format!("cancelled after {} profiles", report.scanned),
                    });
                }
                if !profile.groups.contains(&group_id) {
                    continue;
                }
                if limit.is_some_and(|l| report.scanned >= l) {
                    break 'pages;
                }
                report.scanned += 1;

                let watchlist_hit = self.store.in_watchlist(profile.identity_id)?.is_some();
                let risk = assessor.assess(&profile, watchlist_hit);

                if risk.is_deleted {
                    if mode == SweepMode::Clean {
                        sink.execute(&ActionRecord::new(
                            ActionKind::Remove,
                            profile.identity_id,
                            group_id,
                            risk.score,
                            vec![reason::SWEEP_DELETED_SHELL.to_string()],
                        ))?;
                        report.actions_taken += 1;
                    }
                    report.deleted_shells.push(risk);
                    continue;
                }

                if risk.watchlist_hit {
                    if mode == SweepMode::Clean {
                        sink.execute(&ActionRecord::new(
                            ActionKind::Remove,
                            profile.identity_id,
                            group_id,
                            risk.score,
                            vec![reason::WATCHLIST.to_string()],
                        ))?;
                        report.actions_taken += 1;
                    }
                    report.watchlist_hits.push(risk);
                    continue;
                }

                if risk.reasons.iter().any(|r| r.starts_with("silent watcher")) {
                    report.silent_watchers += 1;
                }

                if risk.score >= self.settings.sweep_flag_cutoff {
                    report.high_risk.push(risk.clone());
                }

                if mode == SweepMode::Clean
                    && risk.score >= self.settings.sweep_shadowban_cutoff
                    && !profile.shadowbanned
                {
                    self.store.set_shadowban(profile.identity_id, true).await?;
                    sink.execute(&ActionRecord::new(
                        ActionKind::Discard,
                        profile.identity_id,
                        group_id,
                        risk.score,
                        vec![reason::SWEEP_HIGH_RISK.to_string()],
                    ))?;
                    report.shadowbans_applied += 1;
                    report.actions_taken += 1;
                }
            }
        }

        report
            .high_risk
            .sort_by(|a, b| b.score.cmp(&a.score).then(a.identity_id.cmp(&b.identity_id)));

        tracing::info!(
            group_id,
            scanned = report.scanned,
            high_risk = report.high_risk.len(),
            shadowbans = report.shadowbans_applied,
            mode = ?mode,
            "sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    fn aged_profile(id: i64, now: i64, days_old: i64) -> IdentityProfile {
        IdentityProfile::new(id, now - days_old * 86_400)
    }

    #[test]
    fn deleted_shell_short_circuits() {
        let s = settings();
        let assessor = MemberAssessor::new(&s, 1_000_000);
        let mut profile = aged_profile(1, 1_000_000, 40);
        profile.is_deleted = true;
        profile.warnings = 9;
        let risk = assessor.assess(&profile, false);
        assert!(risk.is_deleted);
        assert_eq!(risk.score, 0);
    }

    #[test]
    fn dormant_ghost_accumulates_signals() {
        let s = settings();
        let now = 10_000_000;
        let assessor = MemberAssessor::new(&s, now);
        // 40 days old, zero messages, no username or surname.
        let profile = aged_profile(2, now, 40);
        let risk = assessor.assess(&profile, false);
        assert_eq!(risk.score, 10 + 15);
    }

    #[test]
    fn shadowban_cutoff_reachable_via_join_patterns() {
        let s = settings();
        let now = 10_000_000;
        let assessor = MemberAssessor::new(&s, now);
        let mut profile = aged_profile(3, now, 10);
        profile.messages_sent = 3;
        profile.forwards_sent = 3;
        profile.first_forward_ts = profile.first_seen + 60;
        profile.first_message_ts = profile.first_seen + 60;
        profile.first_message_kind = Some(MessageKind::Forward);
        profile.identity_changes = 3;
        profile.warnings = 1;
        let risk = assessor.assess(&profile, false);
        // forward-only + forward-on-join + churn + incidents
        assert_eq!(risk.score, 10 + 25 + 20 + 30);
        assert!(risk.score >= s.sweep_shadowban_cutoff);
    }

    #[test]
    fn assessment_is_deterministic() {
        let s = settings();
        let assessor = MemberAssessor::new(&s, 5_000_000);
        let mut profile = aged_profile(4, 5_000_000, 12);
        profile.warnings = 2;
        let a = assessor.assess(&profile, true);
        let b = assessor.assess(&profile, true);
        assert_eq!(a.score, b.score);
        assert_eq!(a.reasons, b.reasons);
    }
}
