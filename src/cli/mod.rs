//! Command line interface for orbit_packager.
//!
//! Parses flags into a [`Configuration`](crate::config::Configuration),
//! validates it against the current host, builds the installer and reports
//! where it landed.

mod args;
mod output;
pub mod report;

pub use args::Args;
pub use output::OutputManager;

use crate::config::validate;
use crate::error::Result;
use crate::packaging::{self, Attempt, Host};
use env_logger::Env;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    init_logging(args.verbose);

    let config = args.to_configuration();
    let host = Host::current();
    validate(&config, &host)?;
    log::debug!("Building {} on {}", config.package_type(), host);

    let output = OutputManager::new(config.verbose());
    let source = packaging::default_source(&config)?;
    let artifact = packaging::build(&config, &host, &source, |attempt| {
        if let Err(e) = output.progress(&progress_message(attempt)) {
            log::warn!("Failed to write progress: {e}");
        }
    })
    .await?;

    report::report(&output, &artifact, config.open_folder(), &host).await?;
    Ok(0)
}

/// Progress line printed before each build attempt.
pub fn progress_message(attempt: Attempt) -> String {
    if attempt.is_first() {
        "Generating your osquery installer...".to_string()
    } else {
        format!(
            "Generating your osquery installer [attempt {}/{}]...",
            attempt.number, attempt.max
        )
    }
}

/// Log filter used when `RUST_LOG` is unset: silent unless `--verbose`.
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "off" }
}

fn init_logging(verbose: bool) {
    let env = Env::default().default_filter_or(default_log_filter(verbose));
    let _ = env_logger::Builder::from_env(env).try_init();
}
