#![allow(async_fn_in_trait)]

mod article;
mod classify;
mod db;
mod export;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use classify::backend::AnyBackend;
use classify::Classifier;
use export::encoder::CsvSink;
use export::weaviate::WeaviateFetcher;
use export::window::WindowIterator;
use export::StreamingExporter;
use settings::{Backend, Settings};

#[derive(Parser)]
#[command(name = "news_categorizer", about = "Export articles from Weaviate and categorize them with an LLM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct ExportArgs {
    /// First creation date to export (default: NEWSCAT_START_DATE)
    #[arg(long)]
    start: Option<String>,
    /// Stop before this creation date (default: now)
    #[arg(long)]
    end: Option<String>,
    /// Stop fetching once this many records are written
    #[arg(short = 'n', long)]
    max_records: Option<usize>,
    /// Export file (default: NEWSCAT_EXPORT_PATH)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Continue after the last checkpointed window instead of the start date
    #[arg(long)]
    resume: bool,
}

#[derive(Args, Clone, Default)]
struct ClassifyArgs {
    /// Export file to read (default: NEWSCAT_EXPORT_PATH)
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Max rows to classify
    #[arg(short = 'l', long)]
    limit: Option<usize>,
    /// Completion backend
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export articles window by window into the CSV file
    Export(ExportArgs),
    /// Categorize exported articles and write JSON + CSV results
    Classify(ClassifyArgs),
    /// Export, then classify the export
    Run {
        #[command(flatten)]
        export: ExportArgs,
        /// Max rows to classify
        #[arg(short = 'l', long)]
        limit: Option<usize>,
        /// Completion backend
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,
    },
    /// Show the stored export checkpoint
    Status {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Forget the stored export checkpoint
    Reset {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Export(args) => run_export(&mut settings, &args).await.map(|_| ()),
        Commands::Classify(args) => run_classify(&mut settings, &args).await,
        Commands::Run {
            export,
            limit,
            backend,
        } => {
            run_export(&mut settings, &export).await?;
            let args = ClassifyArgs {
                input: None,
                limit,
                backend,
            };
            run_classify(&mut settings, &args).await
        }
        Commands::Status { output } => {
            let output = output.unwrap_or_else(|| settings.export_path.clone());
            let conn = db::connect(&settings.state_db_path)?;
            db::init_schema(&conn)?;
            match db::load_checkpoint(&conn, &checkpoint_key(&output))? {
                Some(cp) => {
                    println!("Export file:     {}", cp.output_path);
                    println!("Exported up to:  {}", cp.window_end);
                    println!("Records written: {}", cp.records_written);
                    println!("Updated at:      {}", cp.updated_at);
                }
                None => println!("No checkpoint for {:?}.", output),
            }
            Ok(())
        }
        Commands::Reset { output } => {
            let output = output.unwrap_or_else(|| settings.export_path.clone());
            let conn = db::connect(&settings.state_db_path)?;
            db::init_schema(&conn)?;
            let removed = db::clear_checkpoint(&conn, &checkpoint_key(&output))?;
            println!("Removed {} checkpoint(s) for {:?}.", removed, output);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn checkpoint_key(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn run_export(settings: &mut Settings, args: &ExportArgs) -> Result<usize> {
    if let Some(start) = &args.start {
        settings.start_date = start.clone();
    }
    if let Some(end) = &args.end {
        settings.end_date = Some(end.clone());
    }
    if let Some(n) = args.max_records {
        settings.max_records = n;
    }
    if let Some(output) = &args.output {
        settings.export_path = output.clone();
    }

    let key = checkpoint_key(&settings.export_path);
    let conn = db::connect(&settings.state_db_path)?;
    db::init_schema(&conn)?;
    let checkpoint = if args.resume {
        let cp = db::load_checkpoint(&conn, &key)?;
        if cp.is_none() {
            info!("No checkpoint for {}, starting at {}", key, settings.start_date);
        }
        cp
    } else {
        None
    };

    let start = match &checkpoint {
        Some(cp) => cp.window_end,
        None => settings.start().context("Invalid start date")?,
    };
    let end = settings.end()?;
    let windows = WindowIterator::new(start, end, settings.step())?;

    let fetcher = WeaviateFetcher::new(settings)?;
    println!("Exporting {} .. {} from {}", start, end, fetcher.endpoint());

    let mut exporter = StreamingExporter::new(fetcher, windows).with_checkpoint(conn, key)?;
    if let Some(cp) = &checkpoint {
        println!("Resuming after {} ({} already written)", cp.window_end, cp.records_written);
        exporter = exporter.resume_from(cp);
    }

    let mut sink = CsvSink::open(&settings.export_path)?;
    let written = exporter.run(&mut sink, settings.max_records).await?;
    println!(
        "Export complete. {} articles written to {:?} (last window {})",
        written,
        settings.export_path,
        exporter.state().current_window
    );
    Ok(written)
}

async fn run_classify(settings: &mut Settings, args: &ClassifyArgs) -> Result<()> {
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }
    let input = args.input.clone().unwrap_or_else(|| settings.export_path.clone());
    let limit = args.limit.unwrap_or(settings.classify_limit);

    let rows = classify::input::read_export(&input, Some(limit))?;
    if rows.is_empty() {
        println!("No exported articles in {:?}. Run 'export' first.", input);
        return Ok(());
    }

    let classifier = Classifier::new(AnyBackend::from_settings(settings)?, settings.max_attempts);
    println!("Classifying {} articles with {}...", rows.len(), classifier.model());
    let (results, stats) = classify::process_rows(&classifier, rows).await?;

    let json_path = settings.output_json_path();
    let csv_path = settings.output_csv_path();
    classify::output::save_as_json(&results, &json_path)?;
    classify::output::save_as_csv(&results, &csv_path)?;

    println!(
        "Classified {} of {} ({} failed). Results saved to {:?} and {:?}",
        stats.classified, stats.total, stats.failed, json_path, csv_path
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
