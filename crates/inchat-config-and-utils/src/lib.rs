//! Configuration, filesystem paths, and logging bootstrap for InChat.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, RetrySettings, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
