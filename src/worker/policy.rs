//! Per-type generation prompts and default configuration fragments.

use serde_json::{Map, Value, json};

use super::model::WorkerType;

/// Defaults a worker type contributes underneath whatever the model generates.
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationDefaults {
    pub tone: &'static str,
    pub style: &'static str,
    pub lifespan: Option<u32>,
    pub stop_if_replied: Option<bool>,
    pub context_limit: Option<u32>,
    pub subject_template: Option<&'static str>,
}

/// Everything the generator needs to know about a worker type.
#[derive(Debug, Clone, Copy)]
pub struct TypePolicy {
    pub worker_type: WorkerType,
    /// One-line summary shown to users.
    pub summary: &'static str,
    pub system_prompt: &'static str,
    pub defaults: ConfigurationDefaults,
    /// Whether a configuration of this type must name at least one recipient.
    /// Digests default to the owner's own inbox.
    pub requires_recipients: bool,
}

impl TypePolicy {
    /// The defaults as a partial configuration object, keyed like the wire format.
    pub fn default_config(&self) -> Value {
        let d = &self.defaults;
        let mut map = Map::new();
        map.insert("tone".into(), json!(d.tone));
        map.insert("style".into(), json!(d.style));
        if let Some(lifespan) = d.lifespan {
            map.insert("lifespan".into(), json!(lifespan));
        }
        if let Some(stop) = d.stop_if_replied {
            map.insert("stopIfReplied".into(), json!(stop));
        }
        if let Some(limit) = d.context_limit {
            map.insert("contextEmails".into(), json!({ "limit": limit }));
        }
        if let Some(subject) = d.subject_template {
            map.insert("subjectTemplate".into(), json!(subject));
        }
        Value::Object(map)
    }
}

static OUTREACH: TypePolicy = TypePolicy {
    worker_type: WorkerType::Outreach,
    summary: "Cold emails with clear calls-to-action",
    system_prompt: "You configure an email worker that sends concise cold outreach emails. \
        The emails are professional, state their purpose quickly and carry ONE clear \
        call-to-action, under 150 words.",
    defaults: ConfigurationDefaults {
        tone: "professional",
        style: "brief",
        lifespan: Some(1),
        stop_if_replied: Some(true),
        context_limit: None,
        subject_template: None,
    },
    requires_recipients: true,
};

static NURTURE: TypePolicy = TypePolicy {
    worker_type: WorkerType::Nurture,
    summary: "Warm relationship check-ins",
    system_prompt: "You configure an email worker that sends warm, conversational emails to \
        maintain a relationship. The emails reference past context, are genuine and never \
        push for anything specific.",
    defaults: ConfigurationDefaults {
        tone: "friendly",
        style: "casual",
        lifespan: None,
        stop_if_replied: None,
        context_limit: Some(10),
        subject_template: None,
    },
    requires_recipients: true,
};

static RESPONDER: TypePolicy = TypePolicy {
    worker_type: WorkerType::Responder,
    summary: "Auto-replies to incoming emails",
    system_prompt: "You configure an email worker that writes quick, helpful auto-replies. \
        Replies are accurate, professional but not robotic, brief and actionable.",
    defaults: ConfigurationDefaults {
        tone: "professional",
        style: "brief",
        lifespan: Some(1),
        stop_if_replied: None,
        context_limit: Some(3),
        subject_template: None,
    },
    requires_recipients: true,
};

static DIGEST: TypePolicy = TypePolicy {
    worker_type: WorkerType::Digest,
    summary: "Summarize multiple emails into one",
    system_prompt: "You configure an email worker that builds email digests, synthesizing \
        many emails into organized bullet points that highlight key information and action \
        items.",
    defaults: ConfigurationDefaults {
        tone: "professional",
        style: "detailed",
        lifespan: None,
        stop_if_replied: None,
        context_limit: Some(50),
        subject_template: Some("Email Digest"),
    },
    requires_recipients: false,
};

/// Look up the policy for a worker type.
pub fn policy_for(worker_type: WorkerType) -> &'static TypePolicy {
    match worker_type {
        WorkerType::Outreach => &OUTREACH,
        WorkerType::Nurture => &NURTURE,
        WorkerType::Responder => &RESPONDER,
        WorkerType::Digest => &DIGEST,
    }
}
