use std::{process, sync::Arc};

use dashcache::{
    application::{error::AppError, replay},
    cache::{CacheConfig, SystemClock},
    config::{self, ReplayArgs, Settings},
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Replay(args) => run_replay(settings, args).await,
    }
}

async fn run_replay(settings: Settings, args: ReplayArgs) -> Result<(), AppError> {
    let (_report, snapshot) = replay::replay_file(
        &args.file,
        CacheConfig::from(&settings.cache),
        Arc::new(SystemClock),
    )
    .await?;

    let rendered = serde_json::to_string_pretty(&snapshot).map_err(InfraError::from)?;
    println!("{rendered}");
    Ok(())
}
