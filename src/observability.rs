//! Structured diagnostics hooks for the decoder and the pipeline engine.
//!
//! The `log_metric!` macro is the primary tool. It formats its key/value pairs
//! into a single JSON-ish line and hands it to the `log` facade at debug level.
//! The `#[cfg(debug_assertions)]` gate compiles every call out of release builds.

/// Logs a structured key-value metric line at debug level, only in debug builds.
///
/// # Example
/// ```
/// use cml_core::log_metric;
/// let items = 12;
/// log_metric!("event"="step_complete", "step"="sort", "items"=&items);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        #[cfg(debug_assertions)]
        {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+
            log::debug!("CML_METRIC: {{ {} }}", parts.join(", "));
        }
    };
}
