// In: src/error.rs

//! This module defines the single, unified error type for the entire cml core.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! The variants fall into the same classes the rest of the crate reasons about:
//! configuration errors (fatal at load time), lookup misses, structural decode
//! errors for a single record, and per-item transformation errors that actions
//! catch and log themselves.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CmlError {
    // =========================================================================
    // === Schema & Decode Errors
    // =========================================================================
    /// The catalog holds no schema for this message type. Distinct from a
    /// malformed schema: callers treat it as a lookup miss, not a failure.
    #[error("No schema registered for message type '{0}'")]
    SchemaNotFound(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error(
        "Buffer underrun reading '{field}' at offset {offset}: needed {needed} bytes, {remaining} remaining"
    )]
    BufferUnderrun {
        field: String,
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// The bytes left after the last complete element of a trailing array
    /// do not form another complete element.
    #[error("Array field '{field}' ends with {remaining} bytes that do not form a complete element")]
    ArrayTrailingBytes { field: String, remaining: usize },

    #[error("Array field '{0}' decoded an element that consumed no bytes")]
    ZeroWidthElement(String),

    #[error("Nested schema depth exceeded the limit of {0}")]
    NestingTooDeep(usize),

    #[error("Encoding field '{field}' failed: {reason}")]
    EncodeFailed { field: String, reason: String },

    #[error("Decoding message type '{message_type}' failed: {source}")]
    DecodeFailed {
        message_type: String,
        #[source]
        source: Box<CmlError>,
    },

    // =========================================================================
    // === Pipeline & Configuration Errors
    // =========================================================================
    #[error("Invalid pipeline configuration: {0}")]
    InvalidPipelineConfig(String),

    #[error("Unknown action identifier '{0}'")]
    UnknownAction(String),

    #[error("Invalid parameters for step '{step}': {reason}")]
    InvalidParams { step: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Entity repository failed: {0}")]
    Repository(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the underlying I/O subsystem (e.g., a schema directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically while parsing schemas or configs.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl CmlError {
    /// True for errors that mean "this configuration can never work", as opposed
    /// to a problem with one record's bytes.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CmlError::InvalidSchema(_)
                | CmlError::InvalidPipelineConfig(_)
                | CmlError::UnknownAction(_)
                | CmlError::InvalidParams { .. }
                | CmlError::InvalidConfig(_)
        )
    }

    /// Wraps a structural error with the message type it was raised for.
    /// Configuration errors are returned unchanged so they stay distinguishable.
    pub(crate) fn in_message(self, message_type: &str) -> CmlError {
        if self.is_configuration_error() {
            return self;
        }
        CmlError::DecodeFailed {
            message_type: message_type.to_string(),
            source: Box::new(self),
        }
    }
}
