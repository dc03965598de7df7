//! Inbound moderation events and the reason codes the engine attaches to
//! its decisions.

use serde::{Deserialize, Serialize};

/// One observed message or join, as delivered by the platform collaborator.
/// Ephemeral: never persisted, only folded into profile state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationEvent {
    pub identity_id: i64,
    pub group_id: i64,
    /// Epoch seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub is_forward: bool,
    #[serde(default)]
    pub has_link: bool,
    #[serde(default)]
    pub is_join: bool,
    /// Raw text, used only for blacklist keyword/domain matching.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Deleted-account shell marker from the collaborator.
    #[serde(default)]
    pub is_deleted_account: bool,
}

impl ModerationEvent {
    pub fn join(identity_id: i64, group_id: i64, timestamp: i64) -> Self {
        Self {
            identity_id,
            group_id,
            timestamp,
            content_hash: None,
            is_forward: false,
            has_link: false,
            is_join: true,
            text: None,
            username: None,
            display_name: None,
            is_deleted_account: false,
        }
    }

    pub fn message(identity_id: i64, group_id: i64, timestamp: i64, hash: &str) -> Self {
        Self {
            identity_id,
            group_id,
            timestamp,
            content_hash: Some(hash.to_string()),
            is_forward: false,
            has_link: false,
            is_join: false,
            text: None,
            username: None,
            display_name: None,
            is_deleted_account: false,
        }
    }
}

/// Reason codes attached to emitted actions and the moderation log.
pub mod reason {
    pub const FLOOD: &str = "flood";
    pub const REPEAT_CONTENT: &str = "repeat_content";
    pub const FORWARD_ONLY: &str = "forward_only";
    pub const PROBATION_LINK: &str = "probation_link";
    pub const LINK: &str = "link";
    pub const BLACKLIST: &str = "blacklist";
    pub const WATCHLIST: &str = "watchlist";
    pub const REPUTATION_FLAGGED: &str = "reputation_flagged";
    pub const OVERRIDE_ALLOW: &str = "override_allow";
    pub const OVERRIDE_FORCE_BAN: &str = "override_force_ban";
    pub const SHADOWBAN: &str = "shadowban";
    pub const SWEEP_DELETED_SHELL: &str = "sweep_deleted_shell";
    pub const SWEEP_HIGH_RISK: &str = "sweep_high_risk";
}
