//! Probe outcome classification.

use serde::{Deserialize, Serialize};

/// What a single path's probe amounted to.
///
/// Every failure mode of both probes folds into exactly one variant, so the
/// aggregator and the circuit breaker only ever match on this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Transport succeeded and the content met the health criteria.
    Success,

    /// Timeout, refused connection, DNS failure, unparsable body.
    TransportError { message: String },

    /// The server answered with a well-formed refusal.
    ProtocolError { code: Option<i64>, message: String },

    /// The server answered but the content failed validation.
    ValidationFailure { errors: Vec<String> },

    /// The path could not be probed as configured. No I/O was attempted.
    ConfigurationError { message: String },
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::TransportError { .. } => "transport_error",
            ProbeOutcome::ProtocolError { .. } => "protocol_error",
            ProbeOutcome::ValidationFailure { .. } => "validation_failure",
            ProbeOutcome::ConfigurationError { .. } => "configuration_error",
        }
    }

    /// Human-readable reason, `None` on success.
    pub fn reason(&self) -> Option<String> {
        match self {
            ProbeOutcome::Success => None,
            ProbeOutcome::TransportError { message } => Some(message.clone()),
            ProbeOutcome::ProtocolError { code: Some(code), message } => {
                Some(format!("{} (code {})", message, code))
            }
            ProbeOutcome::ProtocolError { code: None, message } => Some(message.clone()),
            ProbeOutcome::ValidationFailure { errors } => Some(errors.join("; ")),
            ProbeOutcome::ConfigurationError { message } => Some(message.clone()),
        }
    }
}
