// Quartet Engine
// Main entry point for the quartet binary

use clap::Parser;
use quartet_engine::cli::{Cli, Command, ConfigAction};
use quartet_engine::config::Config;
use quartet_engine::handlers::{
    handle_config_path, handle_config_show, handle_goal, handle_reason, handle_recall,
    handle_remember, handle_send, handle_spiral, handle_status, OutputFormat,
};
use quartet_engine::telemetry::init_telemetry_with;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // `config path` must work even when the file is broken
    if let Command::Config {
        action: ConfigAction::Path,
    } = &cli.command
    {
        return handle_config_path(cli.config.clone());
    }

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with(log_level, config.core.log_format);

    tracing::info!(
        "Quartet Engine v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Send { kind, payload } => handle_send(kind, payload, &config, format).await,

        Command::Goal { text, priority } => handle_goal(text, priority, &config, format).await,

        Command::Remember { text, kind, tag } => {
            handle_remember(text, kind.as_str(), tag, &config, format).await
        }

        Command::Recall { query } => handle_recall(query, &config, format).await,

        Command::Reason { expression } => handle_reason(expression, &config, format).await,

        Command::Spiral { answer } => handle_spiral(answer, &config, format).await,

        Command::Status => handle_status(&config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Path => handle_config_path(cli.config),
            ConfigAction::Show => handle_config_show(&config, format),
        },
    }
}
