use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use congestion_predictor::{
    config::TrainingConfig,
    ml::{Predictor, RawRecord, Trainer},
};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "congestion-predictor", version)]
#[command(about = "Train and serve the network congestion model", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a labeled CSV dataset and persist the model artifact
    Train {
        /// CSV with record fields plus a 0/1 `congestion` column
        #[arg(short, long, value_name = "CSV")]
        data: PathBuf,

        /// Configuration document (defaults to $MODEL_CONFIG, then config/model.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Predict congestion for a JSON record, an array of records, or a file holding either
    Predict {
        #[arg(short, long, value_name = "JSON")]
        input: String,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Train { data, config } => {
            let trainer = Trainer::from_config_path(config.as_deref())?;
            let metrics = trainer
                .train(&data)
                .with_context(|| format!("training on {} failed", data.display()))?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }

        Commands::Predict { input, config } => {
            let predictor = Predictor::load(config.as_deref())?;
            let document = read_input(&input)?;

            match document {
                Value::Array(items) => {
                    let records = items
                        .into_iter()
                        .map(into_record)
                        .collect::<anyhow::Result<Vec<_>>>()?;
                    let results = predictor.predict_batch(&records)?;
                    println!("{}", serde_json::to_string_pretty(&results)?);
                }
                other => {
                    let result = predictor.predict(&into_record(other)?)?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }

        Commands::Config { config } => {
            let config = TrainingConfig::load(config.as_deref())?;
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "congestion_predictor=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Inline JSON, or a path to a JSON file
fn read_input(input: &str) -> anyhow::Result<Value> {
    let path = PathBuf::from(input);
    let text = if path.is_file() {
        std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?
    } else {
        input.to_string()
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

fn into_record(value: Value) -> anyhow::Result<RawRecord> {
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object per record, got {}", other),
    }
}
