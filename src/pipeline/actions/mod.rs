//! Built-in actions and their registry identifiers.

pub mod array_unwrap;
pub mod batch_template;
pub mod context_dump;
pub mod entity_preload;
pub mod header_extract;
pub mod session_enrich;
pub mod sort;
pub mod template;
pub mod timestamp_convert;
pub mod transaction_filter;

pub use array_unwrap::ArrayUnwrap;
pub use batch_template::BatchTemplate;
pub use context_dump::ContextDump;
pub use entity_preload::EntityPreload;
pub use header_extract::HeaderExtractor;
pub use session_enrich::SessionEnrich;
pub use sort::Sort;
pub use template::TemplateAction;
pub use timestamp_convert::TimestampConvert;
pub use transaction_filter::TransactionFilter;

use crate::pipeline::action::ActionRegistry;

pub(crate) fn register_builtins(registry: &mut ActionRegistry) {
    registry
        .register(header_extract::ID, HeaderExtractor::factory)
        .register(session_enrich::ID, SessionEnrich::factory)
        .register(transaction_filter::ID, TransactionFilter::factory)
        .register(array_unwrap::ID, ArrayUnwrap::factory)
        .register(sort::ID, Sort::factory)
        .register(entity_preload::ID, EntityPreload::factory)
        .register(timestamp_convert::ID, TimestampConvert::factory)
        .register(template::ID, TemplateAction::factory)
        .register(batch_template::ID, BatchTemplate::factory)
        .register(context_dump::ID, ContextDump::factory);
}
