//! Error types for the email worker engine.

use uuid::Uuid;

use crate::worker::model::WorkerStatus;

/// Environment / settings errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited the request")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Which schema rule a violation broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    /// The candidate is not a structured object at all.
    Shape,
    Interval,
    Recipients,
    ContextEmails,
    Lifespan,
    /// An optional field carries the wrong JSON type.
    FieldType,
}

/// A single violated rule, pointing at the offending field path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    pub field: String,
    pub rule: ValidationRule,
    pub message: String,
}

/// A candidate configuration broke one or more schema rules.
///
/// Every violation is collected so the caller sees the whole picture at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize)]
#[error("{} violation(s): {}", .violations.len(), describe(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Whether any violation points at `field`.
    pub fn names_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures of the configuration generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Model output could not be parsed after {attempts} attempt(s): {reason}")]
    MalformedOutput { attempts: u32, reason: String },

    #[error("Generated configuration is invalid: {0}")]
    InvalidConfiguration(ValidationError),

    #[error("Language model service unavailable: {reason}")]
    ServiceUnavailable { reason: String },
}

/// Lifecycle operation failures.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Worker {id} not found")]
    NotFound { id: Uuid },

    #[error("Worker {id} is {from}, cannot {operation}")]
    InvalidTransition {
        id: Uuid,
        from: WorkerStatus,
        operation: &'static str,
    },

    #[error("Worker {id} already has an execution report in flight")]
    ExecutionInFlight { id: Uuid },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}
