//! Audit trail for sign-in, linking and refresh.
//!
//! Every orchestrated request produces exactly one [`AuditEvent`], success or
//! failure, carrying the request's correlation ID. Error text passes through
//! [`sanitize_error`] before it is attached, so audit records never contain
//! e-mail addresses or tokens.

use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;

use crate::AuthError;
use crate::federation::AuthProvider;

/// Actor recorded when no account is known.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Maximum length of sanitized error text.
pub const MAX_SANITIZED_LEN: usize = 200;

// ============================================================================
// Sanitization
// ============================================================================

static JWT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]*\.[A-Za-z0-9_-]*").expect("Invalid JWT regex")
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("Invalid email regex")
});

static OPAQUE_TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9_\-+/=]{32,}").expect("Invalid token regex")
});

/// Strips secrets and PII from error text before it is logged or audited.
///
/// JWT-shaped strings, e-mail addresses and opaque tokens of 32 or more
/// characters are replaced with placeholders, whitespace is collapsed and
/// the result is truncated to [`MAX_SANITIZED_LEN`] characters.
#[must_use]
pub fn sanitize_error(text: &str) -> String {
    let redacted = JWT_REGEX.replace_all(text, "[jwt]");
    let redacted = EMAIL_REGEX.replace_all(&redacted, "[email]");
    let redacted = OPAQUE_TOKEN_REGEX.replace_all(&redacted, "[token]");

    let collapsed = redacted.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_SANITIZED_LEN {
        collapsed
    } else {
        collapsed.chars().take(MAX_SANITIZED_LEN).collect()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// `POST /auth/onboarding`.
    Onboarding,
    /// `POST /auth/confirm-linking`.
    ConfirmLinking,
    /// `POST /auth/refresh`.
    Refresh,
}

impl AuditAction {
    /// Returns the action name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::ConfirmLinking => "confirm_linking",
            Self::Refresh => "refresh",
        }
    }
}

/// Result of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Completed.
    Success,
    /// Failed with an error.
    Failure,
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Request correlation ID.
    pub correlation_id: String,
    /// What was attempted.
    pub action: AuditAction,
    /// How it ended.
    pub outcome: AuditOutcome,
    /// User ID, or [`ANONYMOUS_ACTOR`].
    pub actor: String,
    /// Identity provider involved, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<AuthProvider>,
    /// Error code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    /// Sanitized error text on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether onboarding created the account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new_user: Option<bool>,
    /// When the operation finished.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl AuditEvent {
    /// Creates a success event for an anonymous actor.
    #[must_use]
    pub fn success(
        action: AuditAction,
        correlation_id: impl Into<String>,
        occurred_at: OffsetDateTime,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            action,
            outcome: AuditOutcome::Success,
            actor: ANONYMOUS_ACTOR.to_string(),
            provider: None,
            error_code: None,
            error: None,
            is_new_user: None,
            occurred_at,
        }
    }

    /// Creates a failure event from `error`, sanitizing its text.
    #[must_use]
    pub fn failure(
        action: AuditAction,
        correlation_id: impl Into<String>,
        error: &AuthError,
        occurred_at: OffsetDateTime,
    ) -> Self {
        Self {
            outcome: AuditOutcome::Failure,
            error_code: Some(error.error_code()),
            error: Some(sanitize_error(&error.to_string())),
            ..Self::success(action, correlation_id, occurred_at)
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn actor(mut self, actor: impl ToString) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Sets the provider.
    #[must_use]
    pub fn provider(mut self, provider: Option<AuthProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Marks whether the account was created by this request.
    #[must_use]
    pub fn new_user(mut self, is_new_user: bool) -> Self {
        self.is_new_user = Some(is_new_user);
        self
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Records an event. Must not fail the request.
    fn record(&self, event: &AuditEvent);
}

/// Writes audit events to the `carepass::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let provider = event.provider.map(|p| p.as_str()).unwrap_or("-");
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "carepass::audit",
                correlation_id = %event.correlation_id,
                action = event.action.as_str(),
                actor = %event.actor,
                provider,
                is_new_user = event.is_new_user,
                "auth succeeded"
            ),
            AuditOutcome::Failure => tracing::warn!(
                target: "carepass::audit",
                correlation_id = %event.correlation_id,
                action = event.action.as_str(),
                actor = %event.actor,
                provider,
                error_code = event.error_code.unwrap_or("-"),
                error = event.error.as_deref().unwrap_or(""),
                "auth failed"
            ),
        }
    }
}

/// Keeps audit events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
