//! InChat - command-line front end over the chat engine.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use inchat::{InChat, InChatOptions};
use inchat_config_and_utils::{init_logging, Config, Paths};
use versioned_store::{Backoff, Identity, RetryPolicy, Version};

/// InChat command-line interface.
#[derive(Parser)]
#[command(name = "inchat")]
#[command(about = "Multi-user chat over versioned, event-sourced channels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. `info` or `warn,inchat=debug`. Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.inchat
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a user and start a session
    Register {
        username: String,
        #[arg(long, env = "INCHAT_PASSWORD")]
        password: String,
        /// Must equal --password
        #[arg(long)]
        repeat: String,
    },
    /// Start a session for an existing user
    Login {
        username: String,
        #[arg(long, env = "INCHAT_PASSWORD")]
        password: String,
    },
    /// End a session
    Logout {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
    },
    /// Create a channel owned by the session's account
    CreateChannel {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
        name: String,
    },
    /// Join an existing channel
    Join {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
        channel: Identity,
    },
    /// List the session account's channels
    Channels {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
    },
    /// Post a message to a channel
    Post {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
        channel: Identity,
        text: String,
    },
    /// Print a channel with its events, oldest first
    Show { channel: Identity },
    /// Print the channel each time it changes
    ///
    /// Commits made by this process wake the watch at once. Commits made by
    /// other processes on the same database are noticed only when a poll
    /// times out and the next poll finds a newer version, so --timeout bounds
    /// how late they show up.
    Watch {
        channel: Identity,
        /// Version already seen. Without it the current state is printed first
        #[arg(long)]
        since: Option<Version>,
        /// Seconds to wait per poll. Defaults to the configured long-poll timeout
        #[arg(long)]
        timeout: Option<u64>,
        /// Stop after this many changes
        #[arg(long)]
        count: Option<usize>,
    },
    /// Replace the text of a message
    Edit {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
        channel: Identity,
        event: Identity,
        text: String,
    },
    /// Delete an event from a channel
    DeleteEvent {
        #[arg(long, env = "INCHAT_SESSION")]
        session: Identity,
        channel: Identity,
        event: Identity,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    // Initialize logging
    let filter = log_filter(cli.log_level, &config);
    init_logging(&filter, Some(&paths.log_file()))?;

    let database = config.database_file(&paths);
    tracing::debug!(database = %database.display(), "Opening database");
    let chat = InChat::open(&database, engine_options(&config))?;

    let mut stdout = std::io::stdout().lock();
    let result = commands::run(&chat, cli.command, &mut stdout);
    chat.shutdown();
    result
}

/// The `--log-level` flag wins over the configured filter. Either is handed to
/// the subscriber as-is, so per-target directives survive.
fn log_filter(flag: Option<String>, config: &Config) -> String {
    flag.unwrap_or_else(|| config.log_level.clone())
}

/// Maps the file configuration onto engine options.
fn engine_options(config: &Config) -> InChatOptions {
    let mut retry = RetryPolicy::unbounded();
    if let Some(max_attempts) = config.retry.max_attempts {
        retry = retry.with_max_attempts(max_attempts);
    }
    if let Some((initial, max)) = config.retry.backoff() {
        retry = retry.with_backoff(Backoff::new(initial, max));
    }

    InChatOptions {
        session_ttl: chrono::Duration::hours(i64::from(config.session_ttl_hours)),
        long_poll_timeout: config.long_poll_timeout(),
        retry,
    }
}
