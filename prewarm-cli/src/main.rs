mod cli;
mod config;
mod control;
mod error;

use std::process;
use std::sync::Arc;

use clap::Parser;
use prewarm::PrebufferCoordinator;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::Args,
    config::HostConfig,
    control::{Command, HELP},
    error::{AppError, Result},
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "prewarm=info,reqwest=warn,hyper=warn";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = match &args.log_filter {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|e| AppError::Logging(e.to_string()))?
        }
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    // stdout carries command output, logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if args.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| AppError::Logging(e.to_string()))
}

async fn run(args: Args) -> Result<()> {
    init_logging(&args)?;

    let config = HostConfig::load(&args.config)?;
    let prebuffer = config.prebuffer_config(&args);
    info!(
        channels = config.channels.len(),
        max_cached = prebuffer.coordinator.max_cached,
        data_dir = ?prebuffer.predictor.data_dir,
        "Loaded channel map"
    );

    let coordinator =
        PrebufferCoordinator::from_config(prebuffer, Arc::new(config.url_resolver())).await?;
    coordinator.set_adjacency(Arc::new(config.adjacency()));
    coordinator.start();
    spawn_event_logger(&coordinator);

    if !config.favorites.is_empty() {
        coordinator.set_favorites(config.favorites.clone());
    }
    if let Some(channel) = &args.channel {
        switch(&coordinator, &config, channel);
    }

    let result = control_loop(&coordinator, &config).await;
    coordinator.stop().await;
    result
}

async fn control_loop(coordinator: &PrebufferCoordinator, config: &HostConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("{HELP}");

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Control input closed");
            return Ok(());
        };

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => return Ok(()),
            Ok(Some(command)) => execute(coordinator, config, command)?,
            Err(e) => eprintln!("{e}"),
        }
    }
}

fn execute(coordinator: &PrebufferCoordinator, config: &HostConfig, command: Command) -> Result<()> {
    match command {
        Command::Switch(channel) => switch(coordinator, config, &channel),
        Command::Favorites(channels) => {
            println!("favorites: {}", channels.join(", "));
            coordinator.set_favorites(channels);
        }
        Command::Play(channel) => {
            let report = match coordinator.get_cached_stream(&channel) {
                Some(stream) => {
                    let primed = stream.snapshot();
                    let stats = stream.stats();
                    json!({
                        "channel": channel,
                        "cached": true,
                        "primed_bytes": primed.len(),
                        "buffered_secs": stats.buffered_secs,
                        "segments": stats.segments,
                    })
                }
                None => json!({ "channel": channel, "cached": false }),
            };
            println!("{}", serde_json::to_string(&report)?);
            switch(coordinator, config, &channel);
        }
        Command::Evict(channel) => {
            let evicted = coordinator.evict(&channel);
            println!("{}", serde_json::to_string(&json!({ "channel": channel, "evicted": evicted }))?);
        }
        Command::Predict(n) => {
            let predictor = coordinator.predictor();
            let predictions = match coordinator.active_channel() {
                Some(active) => predictor.predict_next(&active, n),
                None => predictor.popular_channels(n),
            };
            println!("{}", serde_json::to_string_pretty(&predictions)?);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&coordinator.stats())?);
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn switch(coordinator: &PrebufferCoordinator, config: &HostConfig, channel: &str) {
    if !config.has_channel(channel) {
        warn!(channel, "Switching to a channel missing from the lineup");
    }
    coordinator.set_active_channel(channel);
}

fn spawn_event_logger(coordinator: &PrebufferCoordinator) {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(channel = event.channel_id(), event = ?event, "Pre-buffer event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
