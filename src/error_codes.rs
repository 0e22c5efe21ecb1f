use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const INVALID_CROP_SELECTION: &str = "INVALID_CROP_SELECTION";
pub const EMPTY_TRANSCRIPT: &str = "EMPTY_TRANSCRIPT";
pub const EMPTY_FILTER_TOPIC: &str = "EMPTY_FILTER_TOPIC";
pub const NO_BASE_IMAGE: &str = "NO_BASE_IMAGE";
pub const UNKNOWN_LAYER: &str = "UNKNOWN_LAYER";
pub const OPERATION_IN_FLIGHT: &str = "OPERATION_IN_FLIGHT";
pub const IMAGE_DECODE_FAILED: &str = "IMAGE_DECODE_FAILED";
pub const SURFACE_UNAVAILABLE: &str = "SURFACE_UNAVAILABLE";
pub const FONT_UNAVAILABLE: &str = "FONT_UNAVAILABLE";
pub const MISSING_CREDENTIAL: &str = "MISSING_CREDENTIAL";
pub const SERVICE_REQUEST_FAILED: &str = "SERVICE_REQUEST_FAILED";
pub const SERVICE_EMPTY_RESPONSE: &str = "SERVICE_EMPTY_RESPONSE";

/// Error taxonomy for user-facing failures.
///
/// Heuristic misses in the cleaner are deliberately absent: they are not
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    /// Bad input; rejected before any state was touched.
    Validation,
    /// Image, surface or font could not be produced.
    Resource,
    /// Credential, network or remote-status failure.
    ExternalService,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Validation, code, message)
    }

    pub fn resource(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Resource, code, message)
    }

    pub fn external(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::ExternalService, code, message)
    }

    fn new(kind: CodedErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Short status line suitable for a transient notice.
    pub fn status_message(&self) -> String {
        match self.kind {
            CodedErrorKind::Validation => format!("invalid input: {}", self.message),
            CodedErrorKind::Resource => format!("could not complete: {}", self.message),
            CodedErrorKind::ExternalService => format!("service error: {}", self.message),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: self.kind,
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub kind: CodedErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any error; uncoded failures are reported as resource errors.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                kind: CodedErrorKind::Resource,
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}
