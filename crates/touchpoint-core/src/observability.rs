use sha2::{Digest, Sha256};
use tracing::Span;

use crate::attribution::AttributionQuery;
use crate::config::Config;
use crate::error::CoreError;

/// Logging context threaded through one attribution run.
///
/// `query_id` is a fingerprint of the serialized query so repeated runs of
/// the same query can be correlated in logs.
#[derive(Debug, Clone)]
pub struct Observability {
    pub project_id: String,
    pub query_id: String,
    /// Emit one debug line per assigned user.
    pub debug: bool,
}

impl Observability {
    pub fn new(project_id: &str, query: &AttributionQuery, debug: bool) -> Result<Self, CoreError> {
        Ok(Self {
            project_id: project_id.to_string(),
            query_id: query_fingerprint(project_id, query)?,
            debug,
        })
    }

    /// Per-user assignment logging follows `TOUCHPOINT_ATTRIBUTION_DEBUG`.
    pub fn from_config(
        project_id: &str,
        query: &AttributionQuery,
        config: &Config,
    ) -> Result<Self, CoreError> {
        Self::new(project_id, query, config.attribution_debug)
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "attribution",
            project_id = %self.project_id,
            query_id = %self.query_id
        )
    }

    /// Logs a failed store read and wraps it as [`CoreError::Store`].
    pub fn store_failure(&self, stage: &'static str) -> impl FnOnce(anyhow::Error) -> CoreError + '_ {
        move |source| {
            tracing::error!(
                project_id = %self.project_id,
                query_id = %self.query_id,
                stage,
                error = %source,
                "attribution store read failed"
            );
            CoreError::store(stage, source)
        }
    }
}

/// First 16 hex chars of SHA-256(project_id || query JSON).
pub fn query_fingerprint(project_id: &str, query: &AttributionQuery) -> Result<String, CoreError> {
    let body = serde_json::to_vec(query)?;
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b"|");
    hasher.update(&body);
    let hash = hasher.finalize();
    Ok(hex::encode(&hash[..8]))
}
