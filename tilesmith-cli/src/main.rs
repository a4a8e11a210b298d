use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use tilesmith::logging::{init_logging, LogFormat};
use tilesmith::{
    identifier_for, load_config, Config, JobState, Metadata, NoopBridge, SubmitOutcome,
    TileService,
};

#[derive(Parser)]
#[command(
    name = "tilesmith",
    about = "Turn large images referenced by URL into zoomable tile pyramids",
    version,
    propagate_version = true
)]
struct Cli {
    /// JSON config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate tiles inline and print the resulting tile set
    Run(SourceArgs),
    /// Generate tiles in the background, streaming progress until done
    Submit(SourceArgs),
    /// Print every tile set in the index
    List,
    /// Print the tile URL template for a completed source
    Template {
        url: String,
        /// Public base URL (defaults to the configured one)
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Print the tile identifier for a source URL
    Id { url: String },
}

#[derive(Args)]
struct SourceArgs {
    /// Source image URL
    url: String,
    /// Display name stored with the tile set
    #[arg(long)]
    name: Option<String>,
    /// Extra metadata as key=value, repeatable
    #[arg(long = "meta", value_parser = parse_key_value)]
    meta: Vec<(String, String)>,
}

impl SourceArgs {
    fn metadata(&self) -> Metadata {
        let mut metadata: Metadata = self.meta.iter().cloned().collect();
        if let Some(name) = &self.name {
            metadata.insert("name".to_string(), name.clone());
        }
        metadata
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging("info", format)?;

    if let Commands::Id { url } = &cli.command {
        println!("{}", identifier_for(url));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    let service = TileService::open(&config, Arc::new(NoopBridge))?;

    match cli.command {
        Commands::Run(args) => run(&service, &args).await,
        Commands::Submit(args) => submit(&service, &args).await,
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&service.tile_sets())?);
            Ok(())
        }
        Commands::Template { url, base_url } => {
            let base_url = base_url.unwrap_or_else(|| service.base_url().to_string());
            println!("{}", service.tile_url_template(&url, &base_url)?);
            Ok(())
        }
        Commands::Id { .. } => Ok(()),
    }
}

async fn run(service: &TileService, args: &SourceArgs) -> anyhow::Result<()> {
    tokio::select! {
        result = service.run_blocking(&args.url, args.metadata()) => {
            let record = result?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; completed stages are kept and will be reused");
            bail!("interrupted")
        }
    }
}

async fn submit(service: &TileService, args: &SourceArgs) -> anyhow::Result<()> {
    let mut events = service.subscribe();

    let tile_id = match service.submit_or_run(&args.url, args.metadata())? {
        SubmitOutcome::Completed(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            return Ok(());
        }
        SubmitOutcome::AlreadyInProgress(id) => {
            println!("{} is already being processed", id);
            return Ok(());
        }
        SubmitOutcome::Queued(id) => id,
    };
    info!("Queued {}", tile_id);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.tile_id == tile_id => {
                    println!("{}", serde_json::to_string(&event)?);
                    if event.status.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; waiting for the running job to finish");
                break;
            }
        }
    }

    service.shutdown();
    service.wait().await;

    let status = service
        .status(&tile_id)
        .context("job status disappeared")?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.status == JobState::Failed {
        bail!(
            "tile generation failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("dataset_id=custom_1").unwrap(),
            ("dataset_id".to_string(), "custom_1".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "tilesmith",
            "--config",
            "tilesmith.json",
            "submit",
            "https://example.com/m31.tif",
            "--name",
            "Andromeda",
            "--meta",
            "dataset_id=custom_7",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("tilesmith.json")));
        match cli.command {
            Commands::Submit(args) => {
                let metadata = args.metadata();
                assert_eq!(metadata.get("name").map(String::as_str), Some("Andromeda"));
                assert_eq!(
                    metadata.get("dataset_id").map(String::as_str),
                    Some("custom_7")
                );
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
