use anyhow::Result;
use clap::Parser;
use factorec::{init_tracing, AppState, Config};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// `SCOPE=PATH` pairs; each observations CSV (`member_id,item_id,rating`
    /// header) is loaded into its own scope.
    #[arg(short, long = "input", required = true, num_args = 1.., value_parser = parse_scope_input)]
    inputs: Vec<(String, PathBuf)>,

    #[arg(long)]
    factors: Option<usize>,

    #[arg(long)]
    regularization: Option<f64>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Writes the training reports as JSON to this path.
    #[arg(long)]
    report: Option<String>,
}

fn parse_scope_input(value: &str) -> std::result::Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((scope, path)) if !scope.is_empty() && !path.is_empty() => {
            Ok((scope.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected SCOPE=PATH, got {}", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing with specified log level
    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting factorec trainer");

    let config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    let mut hyperparameters = config.training.hyperparameters();
    if let Some(factors) = args.factors {
        hyperparameters.factors = factors;
    }
    if let Some(regularization) = args.regularization {
        hyperparameters.regularization = regularization;
    }
    if let Some(learning_rate) = args.learning_rate {
        hyperparameters.learning_rate = learning_rate;
    }
    if let Some(epochs) = args.epochs {
        hyperparameters.epochs = epochs;
    }
    if args.seed.is_some() {
        hyperparameters.seed = args.seed;
    }
    info!("Training hyperparameters: {:?}", hyperparameters);

    let state = AppState::new(config);
    let mut scopes = Vec::with_capacity(args.inputs.len());
    for (scope, path) in &args.inputs {
        if scopes.contains(scope) {
            anyhow::bail!("scope {} was given more than one input", scope);
        }
        state.catalog.import_csv(scope, path)?;
        state.ratings_store.reload(scope).await?;
        scopes.push(scope.clone());
    }

    let mut failures = 0;
    let mut reports = Vec::new();
    for (scope, result) in state.training_service.train_scopes(&scopes, &hyperparameters).await {
        match result {
            Ok(report) => {
                println!("scope {}:", scope);
                for (epoch, error) in report.error_trace.iter().enumerate() {
                    println!("  epoch {:>3}  error {:.6}", epoch + 1, error);
                }
                reports.push(report);
            }
            Err(e) => {
                error!("Training failed for scope {}: {}", scope, e);
                failures += 1;
            }
        }
    }

    if let Some(path) = &args.report {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &reports)?;
        info!("Wrote {} training reports to {}", reports.len(), path);
    }

    if failures > 0 {
        anyhow::bail!("{} of {} training runs failed", failures, scopes.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_scope_gets_its_own_file() {
        let args = Args::try_parse_from([
            "factorec-trainer",
            "--input",
            "lse=data/lse.csv",
            "ucl=data/ucl.csv",
            "--epochs",
            "5",
        ])
        .unwrap();

        assert_eq!(
            args.inputs,
            vec![
                ("lse".to_string(), PathBuf::from("data/lse.csv")),
                ("ucl".to_string(), PathBuf::from("data/ucl.csv")),
            ]
        );
        assert_eq!(args.epochs, Some(5));
    }

    #[test]
    fn test_input_without_scope_is_rejected() {
        assert!(parse_scope_input("data/lse.csv").is_err());
        assert!(parse_scope_input("=data/lse.csv").is_err());
        assert!(Args::try_parse_from(["factorec-trainer"]).is_err());
    }
}
