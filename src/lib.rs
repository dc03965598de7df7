//! ShadowPI — moderation risk-scoring and enforcement engine.
//!
//! Maintains per-identity behavioral state, combines local heuristics
//! with an external reputation lookup and a periodically synced
//! watchlist, escalates through tiered enforcement actions, and supports
//! batch sweeps over a stored roster.

// Core error handling
pub mod errors;

// Configuration
pub mod config;

// Domain records and events
pub mod actions;
pub mod event;
pub mod profile;

// Durable keyed state
pub mod store;

// External reputation and watchlist mirroring
pub mod reputation;
pub mod sync;

// Scoring and enforcement
pub mod enforcement;
pub mod scorer;

// Guards
pub mod gate;
pub mod overrides;

// Event pipeline
pub mod engine;

// Batch operations
pub mod roster;
pub mod sweep;

pub use actions::{ActionKind, ActionRecord, ActionSink, JsonLineSink, RecordingSink};
pub use config::{load_settings, Settings, Thresholds};
pub use engine::{Engine, Outcome};
pub use errors::{EngineError, EngineResult};
pub use event::ModerationEvent;
pub use profile::{GroupState, IdentityProfile, OverrideKind, OverrideRecord, WatchlistEntry};
pub use reputation::{HttpReputationClient, ReputationProvider, ReputationVerdict};
pub use scorer::{RiskAssessment, RiskScorer};
pub use store::ProfileStore;
pub use sweep::{SweepEngine, SweepMode, SweepReport};
