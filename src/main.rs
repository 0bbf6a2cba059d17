use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use card_query::{load_records, CardRecord, QueryPipeline, Vocabulary, DEFAULT_DATASET};

/// Answer a question about a card portfolio
#[derive(Parser, Debug)]
#[command(name = "card-query", version, about)]
struct Args {
    /// The question, e.g. "total balance by issuer"
    question: String,

    /// Card records (.json array or .csv)
    #[arg(short, long)]
    records: Option<PathBuf>,

    /// Vocabulary JSON overriding the built-in keyword tables
    #[arg(long)]
    vocabulary: Option<PathBuf>,

    /// Dataset the question is asked against
    #[arg(long, default_value = DEFAULT_DATASET)]
    dataset: String,

    /// Print the extracted entities and structured query with the result
    #[arg(long)]
    explain: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let vocabulary = match &args.vocabulary {
        Some(path) => Vocabulary::from_file(path)?,
        None => Vocabulary::default(),
    };

    let records: Vec<CardRecord> = match &args.records {
        Some(path) => load_records(path)
            .with_context(|| format!("Failed to load records from {:?}", path))?,
        None => Vec::new(),
    };

    let pipeline = QueryPipeline::new(vocabulary).with_dataset(args.dataset);

    let output = if args.explain {
        serde_json::to_string_pretty(&pipeline.answer(&args.question, &records))?
    } else {
        serde_json::to_string_pretty(&pipeline.run(&args.question, &records))?
    };

    println!("{}", output);
    Ok(())
}
