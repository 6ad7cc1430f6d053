//! Schema enforcement for candidate configurations.
//!
//! The validator is pure. It walks every rule, collects all violations with
//! their field paths, and only then decides. Unknown top-level fields are
//! ignored.

use std::collections::HashSet;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ValidationError, ValidationRule, Violation};

use super::interval::Interval;
use super::model::{Configuration, ContextEmails, DEFAULT_CONTEXT_LIMIT, WorkerType};
use super::policy::policy_for;

/// Alias accepted for `lifespan`.
pub const MAX_EXECUTIONS_ALIAS: &str = "maxExecutions";

/// A configuration that passed validation, plus anything worth a second look.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub configuration: Configuration,
    /// Non-fatal findings such as duplicate recipients.
    pub warnings: Vec<Violation>,
}

/// Fold `maxExecutions` into `lifespan`. An explicit `lifespan` wins.
pub fn normalize_aliases(candidate: &mut Value) {
    let Some(obj) = candidate.as_object_mut() else {
        return;
    };
    let Some(alias) = obj.remove(MAX_EXECUTIONS_ALIAS) else {
        return;
    };
    if obj.get("lifespan").is_none_or(Value::is_null) {
        obj.insert("lifespan".to_string(), alias);
    }
}

/// Validate a candidate against the type-independent rules.
pub fn validate(candidate: &Value) -> Result<Validated, ValidationError> {
    Checker::default().run(candidate, None)
}

/// Validate a candidate for a specific worker type, additionally requiring
/// recipients where the type sends mail to someone.
pub fn validate_for(candidate: &Value, worker_type: WorkerType) -> Result<Validated, ValidationError> {
    Checker::default().run(candidate, Some(worker_type))
}

#[derive(Default)]
struct Checker {
    violations: Vec<Violation>,
    warnings: Vec<Violation>,
}

impl Checker {
    fn fail(&mut self, field: impl Into<String>, rule: ValidationRule, message: impl Into<String>) {
        self.violations.push(Violation {
            field: field.into(),
            rule,
            message: message.into(),
        });
    }

    fn warn(&mut self, field: impl Into<String>, rule: ValidationRule, message: impl Into<String>) {
        self.warnings.push(Violation {
            field: field.into(),
            rule,
            message: message.into(),
        });
    }

    fn run(
        mut self,
        candidate: &Value,
        worker_type: Option<WorkerType>,
    ) -> Result<Validated, ValidationError> {
        let Some(obj) = candidate.as_object() else {
            self.fail("$", ValidationRule::Shape, "configuration must be an object");
            return Err(ValidationError {
                violations: self.violations,
            });
        };

        let interval = self.interval(obj);
        let recipients = self.recipients(obj, worker_type);
        let context_emails = self.context_emails(obj);
        let lifespan = self.lifespan(obj);

        let tone = self.optional_string(obj, "tone");
        let style = self.optional_string(obj, "style");
        let custom_instructions = self.optional_string(obj, "customInstructions");
        let subject_template = self.optional_string(obj, "subjectTemplate");
        let stop_if_replied = self.optional_bool(obj, "stopIfReplied");

        if !self.violations.is_empty() {
            return Err(ValidationError {
                violations: self.violations,
            });
        }

        Ok(Validated {
            configuration: Configuration {
                interval: interval.unwrap_or_default(),
                recipients,
                context_emails,
                tone,
                style,
                custom_instructions,
                subject_template,
                lifespan,
                stop_if_replied: stop_if_replied.unwrap_or(false),
            },
            warnings: self.warnings,
        })
    }

    fn interval(&mut self, obj: &Map<String, Value>) -> Option<String> {
        match obj.get("interval") {
            None | Some(Value::Null) => {
                self.fail("interval", ValidationRule::Interval, "is required");
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.fail("interval", ValidationRule::Interval, "must not be empty");
                None
            }
            Some(Value::String(s)) => match Interval::from_str(s) {
                Ok(_) => Some(s.trim().to_string()),
                Err(e) => {
                    self.fail("interval", ValidationRule::Interval, e);
                    None
                }
            },
            Some(_) => {
                self.fail("interval", ValidationRule::FieldType, "must be a string");
                None
            }
        }
    }

    fn recipients(
        &mut self,
        obj: &Map<String, Value>,
        worker_type: Option<WorkerType>,
    ) -> Vec<String> {
        let mut recipients = Vec::new();
        match obj.get("recipients") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                let mut seen = HashSet::new();
                for (i, item) in items.iter().enumerate() {
                    let field = format!("recipients[{i}]");
                    let Some(address) = item.as_str().map(str::trim) else {
                        self.fail(field, ValidationRule::FieldType, "must be a string");
                        continue;
                    };
                    if lettre::Address::from_str(address).is_err() {
                        self.fail(
                            field,
                            ValidationRule::Recipients,
                            format!("'{address}' is not a valid email address"),
                        );
                        continue;
                    }
                    if !seen.insert(address.to_ascii_lowercase()) {
                        self.warn(
                            field,
                            ValidationRule::Recipients,
                            format!("duplicate recipient '{address}'"),
                        );
                    }
                    recipients.push(address.to_string());
                }
            }
            Some(_) => {
                self.fail("recipients", ValidationRule::FieldType, "must be a list of email addresses");
                return recipients;
            }
        }

        if let Some(worker_type) = worker_type
            && policy_for(worker_type).requires_recipients
            && recipients.is_empty()
            && !self.violations.iter().any(|v| v.field.starts_with("recipients"))
        {
            self.fail(
                "recipients",
                ValidationRule::Recipients,
                format!("{worker_type} workers need at least one recipient"),
            );
        }
        recipients
    }

    fn context_emails(&mut self, obj: &Map<String, Value>) -> Option<ContextEmails> {
        let ctx = match obj.get("contextEmails") {
            None | Some(Value::Null) => return None,
            Some(Value::Object(ctx)) => ctx,
            Some(_) => {
                self.fail("contextEmails", ValidationRule::FieldType, "must be an object");
                return None;
            }
        };

        let limit = match ctx.get("limit") {
            None | Some(Value::Null) => DEFAULT_CONTEXT_LIMIT,
            Some(value) => match value.as_u64().map(u32::try_from) {
                Some(Ok(limit)) => limit,
                _ => {
                    self.fail(
                        "contextEmails.limit",
                        ValidationRule::ContextEmails,
                        "must be a non-negative integer",
                    );
                    DEFAULT_CONTEXT_LIMIT
                }
            },
        };

        Some(ContextEmails {
            labels: self.string_set(ctx, "contextEmails.labels", "labels"),
            from: self.string_set(ctx, "contextEmails.from", "from"),
            limit,
        })
    }

    /// A list of strings with duplicates dropped, first occurrence kept.
    fn string_set(&mut self, ctx: &Map<String, Value>, path: &str, key: &str) -> Vec<String> {
        let items = match ctx.get(key) {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.fail(path, ValidationRule::FieldType, "must be a list of strings");
                return Vec::new();
            }
        };

        let mut out: Vec<String> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) if !out.iter().any(|o| o == s) => out.push(s.to_string()),
                Some(_) => {}
                None => self.fail(format!("{path}[{i}]"), ValidationRule::FieldType, "must be a string"),
            }
        }
        out
    }

    fn lifespan(&mut self, obj: &Map<String, Value>) -> Option<u32> {
        let present = |key: &str| obj.get(key).filter(|v| !v.is_null());
        let (field, value) = match (present("lifespan"), present(MAX_EXECUTIONS_ALIAS)) {
            (Some(lifespan), alias) => {
                if alias.is_some_and(|a| a != lifespan) {
                    self.warn(
                        MAX_EXECUTIONS_ALIAS,
                        ValidationRule::Lifespan,
                        "ignored because lifespan is also set",
                    );
                }
                ("lifespan", lifespan)
            }
            (None, Some(alias)) => (MAX_EXECUTIONS_ALIAS, alias),
            (None, None) => return None,
        };

        match value.as_u64().map(u32::try_from) {
            Some(Ok(n)) if n > 0 => Some(n),
            _ => {
                self.fail(field, ValidationRule::Lifespan, "must be a positive integer");
                None
            }
        }
    }

    fn optional_string(&mut self, obj: &Map<String, Value>, key: &str) -> Option<String> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.fail(key, ValidationRule::FieldType, "must be a string");
                None
            }
        }
    }

    fn optional_bool(&mut self, obj: &Map<String, Value>, key: &str) -> Option<bool> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => {
                self.fail(key, ValidationRule::FieldType, "must be a boolean");
                None
            }
        }
    }
}
