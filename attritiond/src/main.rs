use anyhow::{Context, Result};
use attrition_core::batch::assess_csv;
use attrition_core::chart::HOW_TO_READ;
use attrition_core::form::{FormInput, FormSchema};
use attrition_core::{config::Config, run_server, Analyzer, Assessment};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "attritiond", about = "Employee attrition risk analyzer")]
struct Args {
    /// Путь к конфигу
    #[arg(short, long, default_value = "configs/attrition.yml")]
    config: PathBuf,

    /// Уровень логирования, если не задан RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Запустить HTTP API
    Serve {
        /// Адрес вместо api.listen_addr из конфига
        #[arg(long)]
        listen: Option<String>,
    },
    /// Оценить одного сотрудника по JSON-файлу с полями формы
    Assess {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        sensitivity: Option<f64>,
        /// Вывести результат в JSON
        #[arg(long)]
        json: bool,
    },
    /// Оценить сотрудников из CSV
    Batch {
        #[arg(short, long)]
        input: PathBuf,
        /// Файл результата (по умолчанию stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        sensitivity: Option<f64>,
    },
    /// Вывести описание формы в JSON (ползунок из конфига, если он есть)
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Schema => {
            // Ползунок берётся из конфига, как у `/api/form`; артефакты не загружаются
            let config = Config::load_or_default(&args.config)?;
            let form = FormSchema::standard().describe(&config.sensitivity);
            println!("{}", serde_json::to_string_pretty(&form)?);
            Ok(())
        }
        Command::Serve { listen } => {
            let mut config = Config::load(&args.config)?;
            if let Some(listen) = listen {
                config.api.listen_addr = listen;
                config.validate()?;
            }

            tracing::info!("Starting attrition API (config = {})", args.config.display());

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                let _ = signal::ctrl_c().await;
                tracing::info!("Received SIGINT/SIGTERM, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
            });

            run_server(config, shutdown_rx).await
        }
        Command::Assess {
            input,
            sensitivity,
            json,
        } => {
            let config = Config::load(&args.config)?;
            let analyzer = Analyzer::from_config(&config)?;

            let file = File::open(&input)
                .with_context(|| format!("failed to open profile {}", input.display()))?;
            let payload: serde_json::Value = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("profile {} is not valid JSON", input.display()))?;
            let form = FormInput::from_json(&payload)?;

            let assessment = analyzer.assess(&form, sensitivity)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            } else {
                print_assessment(&assessment);
            }
            Ok(())
        }
        Command::Batch {
            input,
            output,
            sensitivity,
        } => {
            let config = Config::load(&args.config)?;
            let analyzer = Analyzer::from_config(&config)?;

            let reader = File::open(&input)
                .with_context(|| format!("failed to open CSV {}", input.display()))?;
            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
                    format!("failed to create output {}", path.display())
                })?)),
                None => Box::new(std::io::stdout().lock()),
            };

            let summary = assess_csv(&analyzer, BufReader::new(reader), writer, sensitivity)?;
            summary.stats.log_stats();
            tracing::info!(
                "Batch finished: {} rows, {} failed",
                summary.rows,
                summary.failed
            );
            Ok(())
        }
    }
}

fn print_assessment(assessment: &Assessment) {
    println!("Attrition Probability: {:.2}", assessment.probability);
    println!("Risk Level: {}", assessment.risk_label);
    println!(
        "Sensitivity {:.2}: {}",
        assessment.sensitivity,
        if assessment.flagged {
            "flagged for follow-up"
        } else {
            "below threshold"
        }
    );

    if let Some(chart) = &assessment.chart {
        println!();
        println!("Why this prediction?");
        print!("{}", chart.render_text(40));
        println!();
        println!("How to read this chart:");
        for line in HOW_TO_READ {
            println!("  - {line}");
        }
    }
}
