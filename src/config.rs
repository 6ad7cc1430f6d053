//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::worker::generator::GeneratorConfig;

/// Daemon configuration, built from `EMAIL_WORKERS_*` environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub generator: GeneratorConfig,
    /// libSQL database file.
    pub db_path: PathBuf,
    pub http_port: u16,
    /// How often the due sweep runs.
    pub sweep_interval: Duration,
    /// Directory for daily-rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Bearer token for the executor routes. They stay closed when unset.
    pub executor_token: Option<SecretString>,
}

impl EngineConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend: LlmBackend = parse_or(&var, "EMAIL_WORKERS_LLM_BACKEND", LlmBackend::Anthropic)?;
        let api_key = var(backend.api_key_var())
            .ok_or_else(|| ConfigError::MissingEnvVar(backend.api_key_var().to_string()))?;
        let model = var("EMAIL_WORKERS_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let timeout_secs: u64 = parse_or(&var, "EMAIL_WORKERS_GENERATION_TIMEOUT_SECS", 30)?;
        let sweep_secs: u64 = parse_or(&var, "EMAIL_WORKERS_SWEEP_INTERVAL_SECS", 60)?;
        if timeout_secs == 0 || sweep_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: if timeout_secs == 0 {
                    "EMAIL_WORKERS_GENERATION_TIMEOUT_SECS"
                } else {
                    "EMAIL_WORKERS_SWEEP_INTERVAL_SECS"
                }
                .to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            generator: GeneratorConfig {
                timeout: Duration::from_secs(timeout_secs),
                ..GeneratorConfig::default()
            },
            db_path: var("EMAIL_WORKERS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/email-workers.db")),
            http_port: parse_or(&var, "EMAIL_WORKERS_HTTP_PORT", 8080)?,
            sweep_interval: Duration::from_secs(sweep_secs),
            log_dir: var("EMAIL_WORKERS_LOG_DIR").map(PathBuf::from),
            executor_token: var("EMAIL_WORKERS_EXECUTOR_TOKEN").map(SecretString::from),
        })
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = EngineConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-ant-test")])).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-ant-test");
        assert_eq!(config.llm.model, LlmBackend::Anthropic.default_model());
        assert_eq!(config.generator.timeout, Duration::from_secs(30));
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.log_dir.is_none());
        assert!(config.executor_token.is_none());
    }

    #[test]
    fn missing_key_for_selected_backend() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("EMAIL_WORKERS_LLM_BACKEND", "openai"),
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("EMAIL_WORKERS_LLM_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("EMAIL_WORKERS_MODEL", "gpt-4o-mini"),
            ("EMAIL_WORKERS_HTTP_PORT", "9000"),
            ("EMAIL_WORKERS_GENERATION_TIMEOUT_SECS", "5"),
            ("EMAIL_WORKERS_LOG_DIR", "/var/log/email-workers"),
            ("EMAIL_WORKERS_EXECUTOR_TOKEN", "exec-token"),
        ]))
        .unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.generator.timeout, Duration::from_secs(5));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/email-workers")));
        assert_eq!(
            config.executor_token.as_ref().map(ExposeSecret::expose_secret),
            Some("exec-token")
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("EMAIL_WORKERS_HTTP_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "EMAIL_WORKERS_HTTP_PORT"));

        let err = EngineConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("EMAIL_WORKERS_SWEEP_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
