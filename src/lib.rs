//! This file is the root of the `cml_core` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library (`decoder`, `pipeline`, etc.)
//!     so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types most callers need, so a host application
//!     can decode a batch and run it through a pipeline with a single `use`.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
mod observability; // Make macros available throughout the crate

pub mod config;
pub mod decoder;
pub mod error;
pub mod expr;
pub mod logging;
pub mod pipeline;
pub mod schema;
pub mod types;
pub mod utils;

//==================================================================================
// 2. Public Surface
//==================================================================================
pub use config::{CmlConfig, DecodeConfig, EngineConfig};
pub use decoder::{decode_batch, decode_batch_lossy, BinaryDecoder, RawMessage, RecordEncoder};
pub use error::CmlError;
pub use expr::{Condition, Template};
pub use pipeline::{
    ActionRegistry, GlobalContext, Pipeline, PipelineConfig, RunOutcome, SessionContext,
    StepConfig,
};
pub use schema::{FieldDefinition, Schema, SchemaCatalog, SchemaRegistry};
pub use types::{FieldType, PaddingType, Record};
