//! This module defines the core, strongly-typed data representations used
//! throughout the cml core.
//!
//! It includes the wire-level `FieldType` and `PaddingType` enums that schemas
//! are written in, and the dynamically-typed `Record` that the decoder produces
//! and pipeline actions transform.

pub mod field_type;
pub mod record;

// Re-export the main type(s) for easier access.
pub use field_type::{FieldType, PaddingType};
pub use record::Record;
