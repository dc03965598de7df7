//! External reputation lookups and the bulk export feed.
//!
//! The event path only ever sees a tri-state verdict; timeouts and
//! transport failures degrade to [`ReputationVerdict::Unknown`] so scoring
//! continues on local signals alone.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::Settings;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationVerdict {
    Clean,
    Flagged,
    /// Service unreachable, timed out, or returned garbage.
    Unknown,
}

/// Seam for the external verification service.
pub trait ReputationProvider: Send + Sync {
    fn check(
        &self,
        identity_id: i64,
    ) -> impl std::future::Future<Output = ReputationVerdict> + Send;
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    result: Option<CheckResult>,
}

#[derive(Debug, Deserialize)]
struct CheckResult {
    #[serde(default)]
    is_banned: Option<bool>,
    #[serde(default)]
    banned: Option<bool>,
}

/// HTTP client for the reputation service, with a short-TTL verdict cache
/// to bound call volume.
pub struct HttpReputationClient {
    client: reqwest::Client,
    base_url: String,
    export_url: String,
    cache_ttl: Duration,
    cache: RwLock<HashMap<i64, (ReputationVerdict, Instant)>>,
}

impl HttpReputationClient {
    pub fn new(settings: &Settings) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .map_err(|e| EngineError::reputation(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.reputation_base_url.trim_end_matches('/').to_string(),
            export_url: settings.reputation_export_url.clone(),
            cache_ttl: Duration::from_secs(settings.reputation_cache_ttl_secs),
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn cached(&self, identity_id: i64) -> Option<ReputationVerdict> {
        let cache = self.cache.read().await;
        cache.get(&identity_id).and_then(|(verdict, at)| {
            (at.elapsed() < self.cache_ttl).then_some(*verdict)
        })
    }

    async fn remember(&self, identity_id: i64, verdict: ReputationVerdict) {
        // Unknown is not cached: the next event should retry the service.
        if verdict == ReputationVerdict::Unknown {
            return;
        }
        let mut cache = self.cache.write().await;
        cache.insert(identity_id, (verdict, Instant::now()));
        if cache.len() > 10_000 {
            let ttl = self.cache_ttl;
            cache.retain(|_, (_, at)| at.elapsed() < ttl);
        }
    }

    async fn check_remote(&self, identity_id: i64) -> EngineResult<ReputationVerdict> {
        let url = format!("{}/check", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("user_id", identity_id)])
            .send()
            .await?
            .error_for_status()?;
        let payload: CheckResponse = response.json().await?;
        if payload.ok == Some(false) {
            return Ok(ReputationVerdict::Unknown);
        }
        let flagged = payload
            .result
            .map(|r| r.is_banned.or(r.banned).unwrap_or(false))
            .unwrap_or(false);
        Ok(if flagged {
            ReputationVerdict::Flagged
        } else {
            ReputationVerdict::Clean
        })
    }

    /// Download the bulk export: one identity per line, optional reason
    /// after a comma. Comments and malformed lines are skipped.
    pub async fn fetch_export(&self) -> EngineResult<Vec<(i64, Option<String>)>> {
        let response = self
            .client
            .get(&self.export_url)
            .send()
            .await
            .map_err(|e| EngineError::sync_fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::sync_fetch(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::sync_fetch(e.to_string()))?;
        Ok(parse_export(&body))
    }
}

impl ReputationProvider for HttpReputationClient {
    async fn check(&self, identity_id: i64) -> ReputationVerdict {
        if let Some(verdict) = self.cached(identity_id).await {
            return verdict;
        }
        let verdict = match self.check_remote(identity_id).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(identity_id, error = %err, "reputation check degraded to unknown");
                ReputationVerdict::Unknown
            }
        };
        self.remember(identity_id, verdict).await;
        verdict
    }
}

/// Parse the CSV-ish export body into `(identity_id, reason)` pairs.
pub fn parse_export(body: &str) -> Vec<(i64, Option<String>)> {
    let mut parsed = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        let id_part = parts.next().unwrap_or("").trim();
        let Ok(identity_id) = id_part.parse::<i64>() else {
            continue;
        };
        let reason = parts
            .next()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        parsed.push((identity_id, reason));
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_parser_skips_junk_lines() {
        let body = "# header\n123,spam\nnot-a-number\n456\n  \n789,  \n";
        let parsed = parse_export(body);
        assert_eq!(
            parsed,
            vec![
                (123, Some("spam".to_string())),
                (456, None),
                (789, None),
            ]
        );
    }
}
