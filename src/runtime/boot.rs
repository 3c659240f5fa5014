//! Boot: logging init, config load, app construction, run loop.

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::{App, RunStatus};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::Result;

/// Initialise the tracing / logging subsystem.
///
/// `RUST_LOG` wins when set; otherwise `verbose` raises the crate to
/// debug and `silent` drops everything below errors.
pub fn init_logging(verbose: bool, silent: bool) {
    let default_directive = if silent {
        "timberline=error"
    } else if verbose {
        "timberline=debug"
    } else {
        "timberline=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load and validate configuration, then build the app.
pub fn boot() -> Result<App> {
    let mut config = Config::load()?;
    config.validate()?;

    info!(
        input = %config.input_path,
        output = %config.output_path,
        format = %config.format,
        workers = config.workers,
        "configuration loaded"
    );

    let mut app = App::new(config);
    app.initialize()?;
    Ok(app)
}

/// Drive a full processing run, wiring Ctrl-C to the cancel token.
pub async fn run(mut app: App) -> Result<()> {
    let cancel = CancelToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing in-flight files");
            signal_token.cancel();
        }
    });

    let silent = app.config().silent;
    let progress = if silent {
        None
    } else {
        Some(Box::new(|files: u64, total: u64, events: u64| {
            if total > 0 {
                info!(files, total, events, "progress");
            } else {
                info!(files, events, "progress");
            }
        }) as crate::app::ProgressCallback)
    };

    let status = app.process(cancel, progress).await;
    app.cleanup()?;

    match status.status {
        RunStatus::Success => {
            info!(
                events = status.parsed_events,
                duration_ms = status.duration_ms,
                "timeline complete"
            );
        }
        RunStatus::Interrupted => {
            info!(events = status.parsed_events, "run interrupted");
        }
        RunStatus::Error => {
            error!(
                error = status.error.as_deref().unwrap_or("unknown"),
                events = status.parsed_events,
                "run finished with errors"
            );
        }
    }

    Ok(())
}
