//! Outbound actions emitted toward the platform collaborator.
//!
//! The engine never talks to the messaging platform directly; it hands an
//! [`ActionRecord`] to an [`ActionSink`] which executes it and appends it
//! to the moderation log.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Warn the identity in-channel.
    Notify,
    /// Temporarily restrict the identity (mute).
    Restrict,
    /// Remove the identity from the group (ban/kick).
    Remove,
    /// Silently drop the contribution.
    Discard,
}

/// One enforcement decision, attributed and reason-coded for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: String,
    pub action: ActionKind,
    pub identity_id: i64,
    pub group_id: i64,
    pub score: i64,
    pub reason_codes: Vec<String>,
}

impl ActionRecord {
    pub fn new(
        action: ActionKind,
        identity_id: i64,
        group_id: i64,
        score: i64,
        reason_codes: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            identity_id,
            group_id,
            score,
            reason_codes,
        }
    }
}

/// Seam toward the platform collaborator.
pub trait ActionSink: Send + Sync {
    fn execute(&self, record: &ActionRecord) -> EngineResult<()>;
}

/// Writes each action as one JSON line, the collaborator contract used by
/// `shadowpi run`.
pub struct JsonLineSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ActionSink for JsonLineSink<W> {
    fn execute(&self, record: &ActionRecord) -> EngineResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| EngineError::internal("action sink writer poisoned"))?;
        writeln!(writer, "{line}").map_err(|e| EngineError::io("action_sink_write", e))?;
        writer
            .flush()
            .map_err(|e| EngineError::io("action_sink_flush", e))?;
        Ok(())
    }
}

/// Buffers executed actions in memory. Test helper.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ActionRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, kind: ActionKind) -> usize {
        self.records()
            .iter()
            .filter(|r| r.action == kind)
            .count()
    }
}

impl ActionSink for RecordingSink {
    fn execute(&self, record: &ActionRecord) -> EngineResult<()> {
        self.records
            .lock()
            .map_err(|_| EngineError::internal("recording sink poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line_sink_emits_one_line_per_action() {
        let sink = JsonLineSink::new(Vec::new());
        let record = ActionRecord::new(ActionKind::Notify, 1, 2, 35, vec!["flood".to_string()]);
        sink.execute(&record).unwrap();
        let buf = sink.writer.into_inner().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"notify\""));
        assert!(text.contains("\"flood\""));
    }
}
