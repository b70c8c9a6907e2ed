//! # Error Types
//!
//! This module defines error types used throughout the tarjeta library.
//!
//! Errors are classified as **transient** (the job is returned to the queue
//! and retried with backoff, up to the configured attempt ceiling) or
//! **terminal** (the job fails immediately). Classification lives with the
//! type so the job controller never inspects error messages.

use thiserror::Error;

/// Main error type for tarjeta operations.
#[derive(Debug, Error)]
pub enum TarjetaError {
    /// Malformed template: carries the offending element id (when known)
    /// and the validation rule that failed. Terminal, never retried.
    #[error("invalid template: {rule}{}", element_context(.element))]
    TemplateInvalid {
        element: Option<String>,
        rule: String,
    },

    /// A bound data field was missing or unusable for one element.
    /// Recovered locally: the element is skipped and the render continues.
    /// Only surfaces as an error when a caller opts into hard failure.
    #[error("field '{field}' could not be resolved for element '{element}'")]
    FieldResolution { element: String, field: String },

    /// Rasterization failure (corrupt asset, unencodable payload). Terminal.
    #[error("render error: {0}")]
    Render(String),

    /// Asset or storage fetch failed. Transient, retried.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Job exceeded its wall-clock budget. Transient, retried.
    #[error("job timed out after {0}s")]
    Timeout(u64),

    /// External cancellation observed before completion. Terminal, no retry.
    #[error("job cancelled")]
    Cancelled,

    /// Queue-level failure (lease lost, enqueue refused). Transient.
    #[error("queue error: {0}")]
    Queue(String),

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn element_context(element: &Option<String>) -> String {
    match element {
        Some(id) => format!(" (element '{id}')"),
        None => String::new(),
    }
}

impl TarjetaError {
    /// Whether the job controller should return this job to the queue.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TarjetaError::ResourceUnavailable(_)
                | TarjetaError::Timeout(_)
                | TarjetaError::Queue(_)
                | TarjetaError::Io(_)
        )
    }

    /// Short classification tag for job status records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TarjetaError::TemplateInvalid { .. } => "template_invalid",
            TarjetaError::FieldResolution { .. } => "field_resolution",
            TarjetaError::Render(_) => "render",
            TarjetaError::ResourceUnavailable(_) => "resource_unavailable",
            TarjetaError::Timeout(_) => "timeout",
            TarjetaError::Cancelled => "cancelled",
            TarjetaError::Queue(_) => "queue",
            TarjetaError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TarjetaError::ResourceUnavailable("asset".into()).is_transient());
        assert!(TarjetaError::Timeout(30).is_transient());
        assert!(
            !TarjetaError::TemplateInvalid {
                element: None,
                rule: "dup".into()
            }
            .is_transient()
        );
        assert!(!TarjetaError::Cancelled.is_transient());
        assert!(!TarjetaError::Render("bad asset".into()).is_transient());
    }

    #[test]
    fn template_invalid_includes_element_id() {
        let err = TarjetaError::TemplateInvalid {
            element: Some("title".into()),
            rule: "duplicate element id".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("title"));
        assert!(msg.contains("duplicate element id"));
    }
}
