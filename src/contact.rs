//! # Submission Orchestrator
//! Validates a contact-form submission and forwards it to the CMS, with exactly one
//! failover to a statically known secondary origin.
//!
//! Client errors (4xx) are the backend's verdict on the submission and are surfaced
//! unchanged. Only transport failures and 5xx answers trigger the failover.

use std::collections::BTreeMap;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::client::{FetchError, RawResponse, SourceClient};
use crate::locale::Locale;

pub const CONTACT_PATH: &str = "/contact/messages/";

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("static regex"));

/// Field name to localized message.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSubmission {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

enum Problem {
    Required,
    BadEmail,
}

fn localized(field: &'static str, problem: Problem, locale: Locale) -> String {
    let text = match (locale, field, problem) {
        (Locale::En, "email", Problem::BadEmail) => "Invalid email format",
        (Locale::Ar, "email", Problem::BadEmail) => "صيغة البريد الإلكتروني غير صحيحة",
        (Locale::En, "name", _) => "Name is required",
        (Locale::En, "email", _) => "Email is required",
        (Locale::En, "subject", _) => "Subject is required",
        (Locale::En, _, _) => "Message is required",
        (Locale::Ar, "name", _) => "الاسم مطلوب",
        (Locale::Ar, "email", _) => "البريد الإلكتروني مطلوب",
        (Locale::Ar, "subject", _) => "الموضوع مطلوب",
        (Locale::Ar, _, _) => "الرسالة مطلوبة",
    };
    text.to_string()
}

impl ContactSubmission {
    /// Field-level validation. Empty map means valid.
    pub fn validate(&self, locale: Locale) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let required = [
            ("name", &self.name),
            ("email", &self.email),
            ("subject", &self.subject),
            ("message", &self.message),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.insert(field, localized(field, Problem::Required, locale));
            }
        }
        if !errors.contains_key("email") && !EMAIL.is_match(self.email.trim()) {
            errors.insert("email", localized("email", Problem::BadEmail, locale));
        }
        errors
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub message: String,
    pub via_failover: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    #[error("submission failed validation")]
    Validation(FieldErrors),
    #[error("backend rejected the submission with HTTP {status}")]
    Rejected { status: u16, body: Value },
    #[error("submission could not be delivered: {detail}")]
    Failed { detail: String },
}

impl SubmitError {
    fn outcome(&self) -> &'static str {
        match self {
            SubmitError::Validation(_) => "invalid",
            SubmitError::Rejected { .. } => "rejected",
            SubmitError::Failed { .. } => "failed",
        }
    }
}

pub fn default_success_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "Your message has been sent successfully!",
        Locale::Ar => "تم إرسال رسالتك بنجاح!",
    }
}

/// Generic text returned to HTTP clients on terminal failure.
pub fn generic_failure_message(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "Failed to submit contact form. Please try again later.",
        Locale::Ar => "تعذر إرسال النموذج. يرجى المحاولة لاحقاً.",
    }
}

enum Attempt {
    Delivered(String),
    Rejected { status: u16, body: Value },
    Retryable(String),
}

pub struct SubmissionOrchestrator {
    client: SourceClient,
    primary_url: String,
    failover_url: String,
    timeout: Duration,
}

impl SubmissionOrchestrator {
    pub fn new(client: SourceClient, api_base: &str, failover_api_base: &str, timeout: Duration) -> Self {
        Self {
            client,
            primary_url: format!("{}{CONTACT_PATH}", api_base.trim_end_matches('/')),
            failover_url: format!("{}{CONTACT_PATH}", failover_api_base.trim_end_matches('/')),
            timeout,
        }
    }

    pub async fn submit(
        &self,
        submission: &ContactSubmission,
        locale: Locale,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let result = self.deliver(submission, locale).await;
        let outcome = match &result {
            Ok(r) if r.via_failover => "failover",
            Ok(_) => "delivered",
            Err(e) => e.outcome(),
        };
        counter!("contact_submissions_total", "outcome" => outcome).increment(1);
        result
    }

    async fn deliver(
        &self,
        submission: &ContactSubmission,
        locale: Locale,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let errors = submission.validate(locale);
        if !errors.is_empty() {
            return Err(SubmitError::Validation(errors));
        }

        let body = submission.to_json();
        let primary_detail = match self.attempt(&self.primary_url, &body, locale).await {
            Attempt::Delivered(message) => {
                return Ok(SubmissionReceipt {
                    message,
                    via_failover: false,
                })
            }
            Attempt::Rejected { status, body } => return Err(SubmitError::Rejected { status, body }),
            Attempt::Retryable(detail) => detail,
        };

        warn!(target: "contact", url = %self.primary_url, detail = %primary_detail, "primary submission failed; trying failover");
        match self.attempt(&self.failover_url, &body, locale).await {
            Attempt::Delivered(message) => {
                info!(target: "contact", url = %self.failover_url, "submission delivered via failover");
                Ok(SubmissionReceipt {
                    message,
                    via_failover: true,
                })
            }
            Attempt::Rejected { status, body } => Err(SubmitError::Rejected { status, body }),
            Attempt::Retryable(detail) => {
                error!(target: "contact", primary = %primary_detail, failover = %detail, "contact submission failed on both origins");
                Err(SubmitError::Failed {
                    detail: format!("primary: {primary_detail}; failover: {detail}"),
                })
            }
        }
    }

    async fn attempt(&self, url: &str, body: &Value, locale: Locale) -> Attempt {
        match self.client.post_json(url, body, locale, self.timeout).await {
            Ok(resp) => classify(resp, locale),
            Err(e) => Attempt::Retryable(e.to_string()),
        }
    }
}

fn classify(resp: RawResponse, locale: Locale) -> Attempt {
    let parsed: Option<Value> = serde_json::from_slice(&resp.body).ok();
    match resp.status {
        200..=299 => {
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_success_message(locale).to_string());
            Attempt::Delivered(message)
        }
        400..=499 => Attempt::Rejected {
            status: resp.status,
            body: parsed.unwrap_or(Value::Null),
        },
        status => Attempt::Retryable(FetchError::HttpStatus(status).to_string()),
    }
}
