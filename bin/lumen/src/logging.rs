//! Logging setup for the lumen binary.

use eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogArgs;

/// Initialize logging based on command line arguments.
///
/// The filter is built with the following precedence:
/// 1. If `--quiet` is set, only errors are shown
/// 2. Otherwise, start with `RUST_LOG` if set, or the level implied by `-v`
/// 3. Apply any custom directives from `--log.filter`
pub(crate) fn init_logging(args: &LogArgs) -> Result<()> {
    let filter = if args.quiet {
        EnvFilter::new("error")
    } else {
        let base_level = match args.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };

        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom_filter) = &args.filter {
            for directive in custom_filter.split(',') {
                if let Ok(d) = directive.parse() {
                    filter = filter.add_directive(d);
                }
            }
        }

        filter
    };

    if args.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| eyre::eyre!("failed to install log subscriber: {e}"))?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .without_time()
            .try_init()
            .map_err(|e| eyre::eyre!("failed to install log subscriber: {e}"))?;
    }

    if !args.quiet && !args.json {
        log_startup_banner();
    }

    Ok(())
}

fn log_startup_banner() {
    let banner = format!(
        r#"
 _
| |_   _ _ __ ___   ___ _ __
| | | | | '_ ` _ \ / _ \ '_ \
| | |_| | | | | | |  __/ | | |
|_|\__,_|_| |_| |_|\___|_| |_|

 Light Server v{}
    "#,
        env!("CARGO_PKG_VERSION")
    );

    println!("{banner}");
}
