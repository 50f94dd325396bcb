// =============================================================================
// Error kinds — typed failures with fixed propagation rules
// =============================================================================
//
// ConfigError is terminal at startup (exit code 1). AdapterError::Auth moves a
// monitor to FAILED; AdapterError::Transient is retried with backoff.
// StoreError never propagates out of the resolver (a store failure is treated
// as a tier miss). ResolveError surfaces only when every tier missed.
// =============================================================================

use thiserror::Error;

/// Startup configuration failures. Always terminal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid rules '{name}': {reason}")]
    InvalidRules { name: String, reason: String },

    #[error("invalid account '{label}': {reason}")]
    InvalidAccount { label: String, reason: String },

    #[error("missing environment variable {name}")]
    MissingEnv { name: String },

    #[error("invalid value for environment variable {name}: {reason}")]
    InvalidEnv { name: String, reason: String },
}

/// Failures surfaced by a platform adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Credentials rejected. Not retried; the account goes to FAILED.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network problems, timeouts, rate limits, stale streams. Retried with
    /// exponential backoff.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl AdapterError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Rule store failures. The resolver logs these and falls through to the next
/// tier; they are indistinguishable from a miss at the resolution level.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("stored rules for ({firm}, {program_id}) are malformed: {source}")]
    Malformed {
        firm: String,
        program_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Resolution chain exhausted without producing a Rules value.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no rule source available for firm '{firm}' (program: {})", program_id.as_deref().unwrap_or("-"))]
    RuleSourceUnavailable {
        firm: String,
        program_id: Option<String>,
    },
}
