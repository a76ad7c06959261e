//! Logging initialization.
//!
//! Thin wrapper over the observability crate so binaries share one setup.

use std::path::Path;

/// Initialize the logging system.
///
/// With `log_file`, events go to that file as JSONL and are mirrored to
/// stderr. Without it, compact lines go to stderr only. `RUST_LOG` overrides
/// `level`.
///
/// ```ignore
/// init_logging("info", None)?;
/// tracing::info!("ready");
/// ```
pub fn init_logging(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    observability::init_with_config(observability::LogConfig {
        service_name: "inchat".into(),
        default_level: level.into(),
        log_path: log_file.map(Path::to_path_buf),
        also_stderr: true,
    })
}
