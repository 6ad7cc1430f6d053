//! Configuration generator: description + worker type -> validated configuration.
//!
//! One LLM call per attempt. Output that cannot be parsed as a JSON object is
//! retried once with the same request; everything else surfaces immediately.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{GenerationError, LlmError};
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider, ResponseFormat};

use super::model::{Configuration, WorkerType};
use super::policy::{TypePolicy, policy_for};
use super::validator::{normalize_aliases, validate_for};

/// Attempts per generation: the first call plus one retry on malformed output.
pub const MAX_ATTEMPTS: u32 = 2;

const SUBJECT_TEMPLATE: &str = "subjectTemplate";

/// Configuration for the generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Upper bound on a single LLM call.
    pub timeout: Duration,
    /// LLM temperature. Low: we want a schema, not prose.
    pub temperature: f32,
    /// Max tokens for the LLM response.
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

const FIELD_CONTRACT: &str = "\
Return a JSON object with these fields:\n\
- \"interval\" (string, required): when the worker runs, e.g. \"daily at 9am\", \
\"every Monday at 10:00\", \"every 3 days\", \"every 6 hours\".\n\
- \"recipients\" (array of email addresses): who receives the emails.\n\
- \"contextEmails\" (object, optional): {\"labels\": [string], \"from\": [email], \"limit\": integer} \
selecting prior emails to use as context.\n\
- \"tone\", \"style\", \"customInstructions\" (strings, optional).\n\
- \"subjectTemplate\" (string or null): null lets the subject be written at send time.\n\
- \"lifespan\" (positive integer, optional): total number of runs before the worker stops.\n\
- \"stopIfReplied\" (boolean, optional): stop once a recipient replies.\n\
Omit fields you have no information about.";

/// Turns a free-text description into a typed [`Configuration`].
pub struct ConfigurationGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

enum AttemptFailure {
    Malformed(String),
    Unavailable(String),
}

impl ConfigurationGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    /// Generate a configuration for `worker_type` from `description`.
    pub async fn generate(
        &self,
        description: &str,
        worker_type: WorkerType,
    ) -> Result<Configuration, GenerationError> {
        self.generate_with_information(description, &[], worker_type)
            .await
    }

    /// Same as [`generate`](Self::generate), with the worker's free-text
    /// `information` entries passed along as extra context.
    pub async fn generate_with_information(
        &self,
        description: &str,
        information: &[String],
        worker_type: WorkerType,
    ) -> Result<Configuration, GenerationError> {
        let policy = policy_for(worker_type);
        let request = self.build_request(policy, description, information);

        let mut last_reason = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            debug!(worker_type = %worker_type, attempt, "Requesting configuration from LLM");
            match self.attempt(request.clone()).await {
                Ok(parsed) => return merge_and_validate(policy, parsed),
                Err(AttemptFailure::Unavailable(reason)) => {
                    warn!(
                        worker_type = %worker_type,
                        attempt,
                        reason = %reason,
                        "LLM unavailable during configuration generation"
                    );
                    return Err(GenerationError::ServiceUnavailable { reason });
                }
                Err(AttemptFailure::Malformed(reason)) => {
                    warn!(
                        worker_type = %worker_type,
                        attempt,
                        reason = %reason,
                        "LLM returned malformed configuration"
                    );
                    last_reason = reason;
                }
            }
        }

        Err(GenerationError::MalformedOutput {
            attempts: MAX_ATTEMPTS,
            reason: last_reason,
        })
    }

    fn build_request(
        &self,
        policy: &TypePolicy,
        description: &str,
        information: &[String],
    ) -> CompletionRequest {
        let system_prompt = format!("{}\n\n{}", policy.system_prompt, FIELD_CONTRACT);

        let mut user_prompt = format!(
            "Worker type: {} ({})\nDescription: {}",
            policy.worker_type,
            policy.summary,
            description.trim()
        );
        if !information.is_empty() {
            user_prompt.push_str("\n\nAdditional information:");
            for item in information {
                user_prompt.push_str("\n- ");
                user_prompt.push_str(item);
            }
        }

        CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_response_format(ResponseFormat::JsonObject)
    }

    async fn attempt(&self, request: CompletionRequest) -> Result<Value, AttemptFailure> {
        let response =
            match tokio::time::timeout(self.config.timeout, self.llm.complete(request)).await {
                Err(_) => {
                    return Err(AttemptFailure::Unavailable(format!(
                        "timed out after {}s",
                        self.config.timeout.as_secs_f32()
                    )));
                }
                Ok(Err(LlmError::InvalidResponse { reason, .. })) => {
                    return Err(AttemptFailure::Malformed(reason));
                }
                Ok(Err(e)) => return Err(AttemptFailure::Unavailable(e.to_string())),
                Ok(Ok(response)) => response,
            };

        let cost = costs::estimate(
            self.llm.cost_per_token(),
            response.input_tokens,
            response.output_tokens,
        );
        info!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %cost,
            "Configuration generation call completed"
        );

        parse_object(&response.content).map_err(AttemptFailure::Malformed)
    }
}

fn merge_and_validate(
    policy: &TypePolicy,
    mut parsed: Value,
) -> Result<Configuration, GenerationError> {
    normalize_aliases(&mut parsed);
    // A null subject is the "decide at send time" sentinel and beats the type default.
    let subject_unset = parsed.get(SUBJECT_TEMPLATE).is_some_and(Value::is_null);
    let mut candidate = policy.default_config();
    deep_merge(&mut candidate, parsed);
    if subject_unset && let Some(obj) = candidate.as_object_mut() {
        obj.remove(SUBJECT_TEMPLATE);
    }

    let validated = validate_for(&candidate, policy.worker_type).map_err(|e| {
        warn!(worker_type = %policy.worker_type, error = %e, "Generated configuration failed validation");
        GenerationError::InvalidConfiguration(e)
    })?;
    for warning in &validated.warnings {
        warn!(
            worker_type = %policy.worker_type,
            field = %warning.field,
            "{}", warning.message
        );
    }
    Ok(validated.configuration)
}

/// Overlay `overlay` onto `base`. Objects merge key by key; a null in the
/// overlay leaves the base value alone; anything else replaces it.
pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => {
            if !overlay.is_null() {
                *base = overlay;
            }
        }
    }
}

/// Parse model output as a single JSON object.
fn parse_object(text: &str) -> Result<Value, String> {
    let json = extract_json_object(text);
    match serde_json::from_str::<Value>(json) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed;
    }

    // Wrapped in a markdown code block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;
    use crate::llm::provider::CompletionResponse;

    /// Replays canned replies in order and counts calls.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicU32,
        delay: Option<Duration>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                delay: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                delay: Some(delay),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.response_format, ResponseFormat::JsonObject);
            self.prompts.lock().await.push(request.messages[1].content.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let reply = self
                .replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok("{}".to_string()))?;
            Ok(CompletionResponse {
                content: reply,
                input_tokens: 100,
                output_tokens: 20,
            })
        }
    }

    fn generator(llm: Arc<ScriptedLlm>) -> ConfigurationGenerator {
        ConfigurationGenerator::new(llm, GeneratorConfig::default())
    }

    #[tokio::test]
    async fn nurture_defaults_fill_in_tone() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"interval": "every Monday", "recipients": ["alice@x.com"]}"#.to_string(),
        )]);
        let cfg = generator(llm.clone())
            .generate("Send a weekly check-in to alice@x.com", WorkerType::Nurture)
            .await
            .unwrap();
        assert_eq!(cfg.interval, "every Monday");
        assert_eq!(cfg.tone.as_deref(), Some("friendly"));
        assert_eq!(cfg.context_limit(), 10);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn user_prompt_names_the_type_and_its_summary() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"interval": "daily"}"#.to_string())]);
        generator(llm.clone())
            .generate("  digest of my inbox ", WorkerType::Digest)
            .await
            .unwrap();
        let prompts = llm.prompts.lock().await;
        assert_eq!(
            prompts[0],
            "Worker type: DIGEST (Summarize multiple emails into one)\nDescription: digest of my inbox"
        );
    }

    #[tokio::test]
    async fn malformed_once_then_valid_takes_two_calls() {
        let llm = ScriptedLlm::new(vec![
            Ok("Sure! Here is your config".to_string()),
            Ok("```json\n{\"interval\": \"daily at 9am\", \"recipients\": [\"bob@example.com\"]}\n```"
                .to_string()),
        ]);
        let cfg = generator(llm.clone())
            .generate("daily nudge to bob", WorkerType::Outreach)
            .await
            .unwrap();
        assert_eq!(cfg.recipients, vec!["bob@example.com"]);
        assert!(cfg.stop_if_replied);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_twice_surfaces() {
        let llm = ScriptedLlm::new(vec![Ok("nope".to_string()), Ok("[1, 2]".to_string())]);
        let err = generator(llm.clone())
            .generate("whatever", WorkerType::Digest)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput { attempts: 2, .. }));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn invalid_configuration_is_not_retried() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"interval": "daily", "recipients": ["not-an-email"]}"#.to_string(),
        )]);
        let err = generator(llm.clone())
            .generate("spam everyone", WorkerType::Outreach)
            .await
            .unwrap_err();
        match err {
            GenerationError::InvalidConfiguration(v) => assert!(v.names_field("recipients[0]")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_service_unavailable() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::RequestFailed {
            provider: "scripted".into(),
            reason: "502 Bad Gateway".into(),
        })]);
        let err = generator(llm.clone())
            .generate("anything", WorkerType::Nurture)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ServiceUnavailable { .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_response_counts_as_malformed() {
        let llm = ScriptedLlm::new(vec![
            Err(LlmError::InvalidResponse {
                provider: "scripted".into(),
                reason: "empty body".into(),
            }),
            Ok(r#"{"interval": "daily"}"#.to_string()),
        ]);
        let cfg = generator(llm.clone())
            .generate("digest of my inbox", WorkerType::Digest)
            .await
            .unwrap();
        assert_eq!(cfg.subject_template.as_deref(), Some("Email Digest"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn explicit_null_subject_overrides_default() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"interval": "daily", "subjectTemplate": null, "tone": null}"#.to_string(),
        )]);
        let cfg = generator(llm)
            .generate("digest of my inbox, pick a subject each time", WorkerType::Digest)
            .await
            .unwrap();
        assert_eq!(cfg.subject_template, None);
        assert_eq!(cfg.tone.as_deref(), Some("professional"));
    }

    #[tokio::test]
    async fn rate_limit_is_service_unavailable_without_retry() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::RateLimited {
            provider: "scripted".into(),
        })]);
        let err = generator(llm.clone())
            .generate("anything", WorkerType::Nurture)
            .await
            .unwrap_err();
        match err {
            GenerationError::ServiceUnavailable { reason } => assert!(reason.contains("rate limited")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_is_service_unavailable() {
        let llm = ScriptedLlm::slow(Duration::from_secs(5));
        let config = GeneratorConfig {
            timeout: Duration::from_millis(50),
            ..GeneratorConfig::default()
        };
        let err = ConfigurationGenerator::new(llm.clone(), config)
            .generate("anything", WorkerType::Nurture)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ServiceUnavailable { .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn max_executions_overrides_type_lifespan() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"interval": "every 3 days", "recipients": ["a@example.com"], "maxExecutions": 4}"#
                .to_string(),
        )]);
        let cfg = generator(llm)
            .generate("three follow-ups", WorkerType::Outreach)
            .await
            .unwrap();
        assert_eq!(cfg.lifespan, Some(4));
    }

    #[test]
    fn deep_merge_parsed_wins_and_null_falls_back() {
        let mut base = json!({ "tone": "friendly", "contextEmails": { "limit": 10 } });
        deep_merge(
            &mut base,
            json!({
                "tone": null,
                "style": "short",
                "contextEmails": { "labels": ["work"] },
            }),
        );
        assert_eq!(
            base,
            json!({
                "tone": "friendly",
                "style": "short",
                "contextEmails": { "limit": 10, "labels": ["work"] },
            })
        );
    }

    #[test]
    fn extract_json_direct() {
        let input = r#"{"interval": "daily"}"#;
        assert_eq!(extract_json_object(input), input);
    }

    #[test]
    fn extract_json_from_markdown() {
        let input = "Here you go:\n```json\n{\"interval\": \"daily\"}\n```\n";
        assert_eq!(extract_json_object(input), "{\"interval\": \"daily\"}");
    }

    #[test]
    fn extract_json_with_surrounding_text() {
        let input = "Config: {\"interval\": \"daily\"} hope that helps";
        assert_eq!(extract_json_object(input), "{\"interval\": \"daily\"}");
    }
}
