// In: src/logging.rs

//! Process-wide logger setup.
//!
//! Library code only talks to the `log` facade. Binaries and tests that want
//! output call [`enable_verbose_logging`] once; later calls are no-ops.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Once;

use log::LevelFilter;

use crate::error::CmlError;

static INIT_LOGGER: Once = Once::new();

/// Installs an `env_logger` backend with a compact `[LEVEL] message` format.
///
/// When `log_file` is given, output is appended to that file instead of stderr.
/// The file is opened before the one-time initialisation so that a bad path is
/// reported to the caller rather than swallowed.
pub fn enable_verbose_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<(), CmlError> {
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT_LOGGER.call_once(move || {
        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(level);

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        // Another logger may already be installed by the host application.
        let _ = builder.try_init();
    });
    Ok(())
}
