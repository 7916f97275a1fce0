pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod socket;
pub mod state;

pub use api::ChatApi;
pub use commands::{parse_line, Command};
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::ChatSession;
pub use state::{ChatState, Phase};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the log subscriber. Logs go to stderr so they do not interleave
/// with the conversation printed on stdout.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("duet_client=debug,warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
