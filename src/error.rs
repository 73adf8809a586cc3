use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Aggregates every failure mode exposed by the providers.
///
/// Adapters never retry internally. Callers branch on [`LLMError::kind`] to decide
/// whether to retry, fall back to another provider, or surface an actionable message.
#[derive(Debug, Clone, Error)]
pub enum LLMError {
    /// No credential could be resolved for an HTTP backend.
    #[error(
        "missing credential for {provider}: set `{config_key}` in the provider config or the {env_var} environment variable"
    )]
    MissingCredential {
        provider: &'static str,
        /// Configuration key that supplies the credential.
        config_key: &'static str,
        /// Environment variable consulted as a fallback.
        env_var: &'static str,
    },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
    /// Connection-level failure before any status line was received.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The backend answered with a non-2xx status.
    #[error("http status {status}: {message}")]
    Http {
        status: u16,
        /// Backend error message when the body could be parsed, else the raw body.
        message: String,
        /// Raw response body, kept verbatim for debugging.
        body: String,
        /// Wait duration suggested through `Retry-After`, if any.
        retry_after: Option<Duration>,
    },
    /// A payload did not match the schema the adapter expects.
    #[error("protocol error from {provider}: {message}")]
    Protocol {
        provider: &'static str,
        message: String,
    },
    /// The backend populated its own structured error field.
    #[error("provider {provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
    /// A deadline elapsed before the backend finished.
    #[error("{provider} timed out after {after:?}")]
    Timeout {
        provider: &'static str,
        after: Duration,
    },
    /// A CLI backend exited unsuccessfully.
    #[error("{provider} exited with {}: {message}", exit_label(.code))]
    Process {
        provider: &'static str,
        /// Exit code, absent when the process was terminated by a signal.
        code: Option<i32>,
        /// Diagnostic output captured from the process.
        message: String,
    },
    /// The transport ended before the backend signalled end of generation.
    #[error("stream from {provider} closed unexpectedly: {message}")]
    StreamClosed {
        provider: &'static str,
        message: String,
    },
    /// The caller withdrew interest.
    #[error("request aborted: {message}")]
    Aborted { message: String },
    /// Declares that a capability is not supported by the selected provider.
    #[error("feature unsupported: {feature}")]
    UnsupportedFeature { feature: &'static str },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
}

/// Coarse error category used for retry and fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Protocol,
    Backend,
    Timeout,
    Process,
    Cancelled,
    Unsupported,
    Validation,
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsunagi_llm::error::{ErrorKind, LLMError};
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert_eq!(err.kind(), ErrorKind::Transport);
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsunagi_llm::error::LLMError;
    ///
    /// let err = LLMError::provider("openai", "model overloaded");
    /// assert!(matches!(err, LLMError::Provider { provider: "openai", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Protocol`] for a payload that failed to parse.
    pub fn protocol<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Protocol {
            provider,
            message: message.into(),
        }
    }

    /// Attributes a transport-level timeout to the adapter that issued the request.
    pub fn with_provider(self, provider: &'static str) -> Self {
        match self {
            Self::Timeout { after, .. } => Self::Timeout { provider, after },
            other => other,
        }
    }

    /// Maps the variant onto its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential { .. } | Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::Transport { .. } | Self::Http { .. } | Self::StreamClosed { .. } => {
                ErrorKind::Transport
            }
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Provider { .. } => ErrorKind::Backend,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Process { .. } => ErrorKind::Process,
            Self::Aborted { .. } => ErrorKind::Cancelled,
            Self::UnsupportedFeature { .. } => ErrorKind::Unsupported,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// Returns `true` when a caller-side retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport { .. } | Self::Timeout { .. } | Self::StreamClosed { .. } => true,
            _ => false,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Builds an [`LLMError::Http`] from a non-2xx response.
///
/// Both the OpenAI and Anthropic families wrap failures in `{"error": {"message": ..}}`,
/// so one parser serves every HTTP adapter.
pub(crate) fn http_status_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let message = extract_error_message(body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            "empty response body".to_string()
        } else {
            body.trim().to_string()
        }
    });
    LLMError::Http {
        status,
        message,
        body: body.to_string(),
        retry_after: retry_after_from_headers(headers),
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) message: Option<String>,
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) code: Option<Value>,
}

impl ErrorBody {
    /// Renders the backend error as `message (code)`.
    pub(crate) fn describe(&self) -> String {
        let mut message = self
            .message
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        match (&self.code, &self.kind) {
            (Some(Value::String(code)), _) => message = format!("{message} ({code})"),
            (Some(Value::Number(code)), _) => message = format!("{message} ({code})"),
            (_, Some(kind)) => message = format!("{message} ({kind})"),
            _ => {}
        }
        message
    }
}

/// Extracts `error.message` from a JSON error envelope.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .map(|error| error.describe())
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_names_the_remediation() {
        let err = LLMError::MissingCredential {
            provider: "openai",
            config_key: "api_key",
            env_var: "OPENAI_API_KEY",
        };
        let message = err.to_string();
        assert!(message.contains("api_key"), "{message}");
        assert!(message.contains("OPENAI_API_KEY"), "{message}");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn http_status_error_extracts_backend_message() {
        let headers = HashMap::from([("Retry-After".to_string(), "7".to_string())]);
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#;
        let err = http_status_error(429, &headers, body);
        match &err {
            LLMError::Http {
                status,
                message,
                body: raw,
                retry_after,
            } => {
                assert_eq!(*status, 429);
                assert_eq!(message, "Rate limit reached (rate_limit_exceeded)");
                assert_eq!(raw, body);
                assert_eq!(*retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn http_status_error_falls_back_to_raw_body() {
        let err = http_status_error(502, &HashMap::new(), "bad gateway\n");
        match err {
            LLMError::Http { message, .. } => assert_eq!(message, "bad gateway"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn anthropic_error_type_is_used_when_code_missing() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(
            extract_error_message(body).as_deref(),
            Some("Overloaded (overloaded_error)")
        );
    }

    #[test]
    fn transport_timeout_is_attributed_to_the_adapter() {
        let err = LLMError::Timeout {
            provider: "http",
            after: Duration::from_secs(5),
        }
        .with_provider("openrouter");
        assert!(matches!(
            err,
            LLMError::Timeout {
                provider: "openrouter",
                ..
            }
        ));

        let untouched = LLMError::transport("reset").with_provider("openrouter");
        assert!(matches!(untouched, LLMError::Transport { .. }));
    }

    #[test]
    fn process_error_reports_signal_termination() {
        let err = LLMError::Process {
            provider: "claude_cli",
            code: None,
            message: "killed".to_string(),
        };
        assert!(err.to_string().contains("a signal"));
        assert_eq!(err.kind(), ErrorKind::Process);
    }
}
