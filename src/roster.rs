//! Roster import: seed profiles from a membership export.
//!
//! Lines look like `numericId [@handle] [display name…]`; commas are
//! tolerated as separators. Malformed lines are skipped individually, the
//! batch never aborts.

use chrono::Utc;

use crate::errors::EngineResult;
use crate::store::ProfileStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterLine {
    pub identity_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    /// Sample of skipped lines for the admin reply, capped.
    pub skipped_lines: Vec<String>,
}

const SKIPPED_SAMPLE_CAP: usize = 5;

/// Parse one roster line. The numeric id may appear anywhere; the first
/// `@token` becomes the handle; everything else joins the display name.
pub fn parse_line(line: &str) -> Option<RosterLine> {
    let mut identity_id = None;
    let mut username = None;
    let mut remainder = Vec::new();

    let normalized = line.replace(',', " ");
    for token in normalized.split_whitespace() {
        if identity_id.is_none() {
            if let Ok(id) = token.parse::<i64>() {
                identity_id = Some(id);
                continue;
            }
        }
        if username.is_none() {
            if let Some(handle) = token.strip_prefix('@') {
                if !handle.is_empty() {
                    username = Some(handle.to_string());
                    continue;
                }
            }
        }
        remainder.push(token);
    }

    Some(RosterLine {
        identity_id: identity_id?,
        username,
        display_name: if remainder.is_empty() {
            None
        } else {
            Some(remainder.join(" "))
        },
    })
}

/// Import a newline-separated roster into the store for one group.
pub async fn import_roster(
    store: &ProfileStore,
    group_id: i64,
    body: &str,
) -> EngineResult<ImportSummary> {
    let now = Utc::now().timestamp();
    let mut summary = ImportSummary::default();

    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let Some(parsed) = parse_line(line) else {
            summary.skipped += 1;
            if summary.skipped_lines.len() < SKIPPED_SAMPLE_CAP {
                summary.skipped_lines.push(line.to_string());
            }
            tracing::debug!(line, "skipping malformed roster line");
            continue;
        };
        store
            .update_profile(parsed.identity_id, |profile| {
                if profile.first_seen == 0 {
                    profile.first_seen = now;
                }
                profile.last_seen = now;
                profile.groups.insert(group_id);
                if parsed.username.is_some() {
                    profile.username = parsed.username.clone();
                }
                if parsed.display_name.is_some() {
                    profile.display_name = parsed.display_name.clone();
                }
            })
            .await?;
        summary.imported += 1;
    }

    tracing::info!(
        group_id,
        imported = summary.imported,
        skipped = summary.skipped,
        "roster import complete"
    );
    Ok(summary)
}
