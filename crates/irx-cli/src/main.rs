//! IRX CLI - Command-line interface
//!
//! Usage:
//!   irx run --train <csv> --input <csv> [--output <path>] [--format json|csv] [--breakdown]
//!   irx evaluate --train <csv> --test <csv>
//!   irx extract --train <csv> <text>

mod dataset;

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use irx_core::{AppConfig, FieldMap, FieldName, LoggingConfig, StrategyRun};
use irx_extractor::metrics::FieldEvaluator;
use irx_extractor::{BatchRow, VotingEnsemble};

#[derive(Parser)]
#[command(name = "irx")]
#[command(about = "Incident report field extraction with ensemble voting")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a labeled CSV and extract fields from every row of another
    Run {
        /// Training CSV with a `text` column and label columns
        #[arg(long)]
        train: PathBuf,
        /// CSV of reports to extract, with a `text` column
        #[arg(long)]
        input: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        /// Include each strategy's own predictions
        #[arg(long)]
        breakdown: bool,
    },
    /// Train on one labeled CSV and score the ensemble on another
    Evaluate {
        #[arg(long)]
        train: PathBuf,
        #[arg(long)]
        test: PathBuf,
        /// Print metrics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Train on a labeled CSV and extract fields from a single text
    Extract {
        #[arg(long)]
        train: PathBuf,
        /// Report text
        text: String,
        /// Include each strategy's own predictions
        #[arg(long)]
        breakdown: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            train,
            input,
            output,
            format,
            breakdown,
        } => {
            let ensemble = train_ensemble(&config, &train)?;
            let input = dataset::load(&input)
                .with_context(|| format!("Failed to load input: {}", input.display()))?;

            let rows = ensemble.extract_batch(&input.texts);
            let writer = create_output_writer(output.as_deref())?;
            match format {
                OutputFormat::Json => write_json(writer, &rows, breakdown)?,
                OutputFormat::Csv => write_csv(writer, &rows, breakdown)?,
            }
        }
        Commands::Evaluate { train, test, json } => {
            let ensemble = train_ensemble(&config, &train)?;
            let test = dataset::load(&test)
                .with_context(|| format!("Failed to load test set: {}", test.display()))?;

            let predicted: Vec<FieldMap> = ensemble
                .extract_batch(&test.texts)
                .into_iter()
                .map(|row| row.fields)
                .collect();
            let report = FieldEvaluator::new().evaluate(&predicted, &test.labels)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.report());
            }
        }
        Commands::Extract {
            train,
            text,
            breakdown,
        } => {
            let ensemble = train_ensemble(&config, &train)?;
            let output = ensemble.extract_with_voting(&text);

            let json = if breakdown {
                serde_json::to_string_pretty(&output)?
            } else {
                serde_json::to_string_pretty(&output.fields)?
            };
            println!("{json}");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

/// Logs go to stderr so stdout carries only results
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn train_ensemble(config: &AppConfig, path: &Path) -> Result<VotingEnsemble> {
    let data = dataset::load(path)
        .with_context(|| format!("Failed to load training set: {}", path.display()))?;
    if data.is_empty() {
        bail!("Training set {} has no rows", path.display());
    }

    let mut ensemble = VotingEnsemble::new(config);
    let report = ensemble.train_all(&data.texts, &data.labels)?;
    for (strategy, reason) in &report.failed {
        eprintln!("warning: strategy {strategy} failed to train: {reason}");
    }
    if report.all_failed() {
        bail!("Every strategy failed to train");
    }

    info!(
        examples = report.examples,
        strategies = report.trained.len(),
        "Ensemble ready"
    );
    Ok(ensemble)
}

/// Create the output writer: a file when given, stdout otherwise
fn create_output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    Ok(writer)
}

/// A batch row as written out; per-strategy predictions only on request
#[derive(Serialize)]
struct RowView<'a> {
    index: usize,
    text_preview: &'a str,
    fields: &'a FieldMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    predictions: Option<&'a [StrategyRun]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> RowView<'a> {
    fn new(row: &'a BatchRow, breakdown: bool) -> Self {
        Self {
            index: row.index,
            text_preview: &row.preview,
            fields: &row.fields,
            predictions: breakdown.then_some(row.predictions.as_slice()),
            error: row.error.as_deref(),
        }
    }
}

fn write_json(mut writer: Box<dyn Write>, rows: &[BatchRow], breakdown: bool) -> Result<()> {
    let views: Vec<RowView<'_>> = rows.iter().map(|r| RowView::new(r, breakdown)).collect();
    serde_json::to_writer_pretty(&mut writer, &views)?;
    writeln!(writer)?;
    Ok(())
}

/// One column per extracted field; with `breakdown`, one JSON column per strategy
fn write_csv(writer: Box<dyn Write>, rows: &[BatchRow], breakdown: bool) -> Result<()> {
    let fields: Vec<&FieldName> = rows
        .iter()
        .flat_map(|r| r.fields.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let strategies: Vec<&str> = if breakdown {
        rows.first()
            .map(|r| r.predictions.iter().map(|p| p.strategy.as_str()).collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let mut csv = WriterBuilder::new().from_writer(writer);

    let mut header = vec!["index".to_string(), "text_preview".to_string()];
    header.extend(fields.iter().map(|f| f.to_string()));
    header.extend(strategies.iter().map(|s| format!("{s}_predictions")));
    header.push("error".to_string());
    csv.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.index.to_string(), row.preview.clone()];
        record.extend(
            fields
                .iter()
                .map(|f| row.fields.get(*f).cloned().unwrap_or_default()),
        );
        for strategy in &strategies {
            let run = row.predictions.iter().find(|p| p.strategy == *strategy);
            record.push(match run {
                Some(run) => serde_json::to_string(&run.outcome)?,
                None => String::new(),
            });
        }
        record.push(row.error.clone().unwrap_or_default());
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use irx_core::StrategyOutcome;

    fn row(index: usize, pairs: &[(&str, &str)], error: Option<&str>) -> BatchRow {
        let fields: FieldMap = pairs
            .iter()
            .map(|(k, v)| (FieldName::new(k), v.to_string()))
            .collect();
        BatchRow {
            index,
            preview: format!("report {index}"),
            predictions: vec![StrategyRun {
                strategy: "hybrid".to_string(),
                outcome: StrategyOutcome::from_result(Ok(fields.clone())),
            }],
            fields,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "irx", "run", "--train", "train.csv", "--input", "in.csv", "--format", "csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                format, breakdown, output, ..
            } => {
                assert_eq!(format, OutputFormat::Csv);
                assert!(!breakdown);
                assert!(output.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_requires_train() {
        assert!(Cli::try_parse_from(["irx", "extract", "some text"]).is_err());
    }

    #[test]
    fn test_csv_output_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rows = vec![
            row(0, &[("department", "IT")], None),
            row(1, &[("location", "Dock 1")], Some("all strategies failed")),
        ];

        write_csv(create_output_writer(Some(&path)).unwrap(), &rows, true).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next(),
            Some("index,text_preview,department,location,hybrid_predictions,error")
        );
        assert!(lines.next().unwrap().starts_with("0,report 0,IT,,"));
        assert!(lines.next().unwrap().ends_with(",all strategies failed"));
    }

    #[test]
    fn test_json_output_hides_predictions_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let rows = vec![row(0, &[("department", "IT")], None)];

        write_json(create_output_writer(Some(&path)).unwrap(), &rows, false).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["fields"]["department"], "IT");
        assert!(value[0].get("predictions").is_none());
        assert!(value[0].get("error").is_none());
    }
}
