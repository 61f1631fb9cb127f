//! Fetch a listing page and show what a pattern extracts from it, or ask the
//! configured model to infer one. Nothing is written to the store.

use anyhow::Result;
use clap::{Parser, Subcommand};

use source_digest::config::AppConfig;
use source_digest::extract::{compile_pattern, extract_candidates, infer_pattern, validate_match_count};
use source_digest::fetch::{ContentFetcher, HttpFetcher};
use source_digest::llm::{build_client_from_config, RetryBudget};

#[derive(Debug, Parser)]
#[command(name = "pattern_preview")]
#[command(about = "Preview or infer a listing-page extraction pattern")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply a pattern to the page and list the candidates.
    Test { url: String, pattern: String },
    /// Let the model propose a pattern for the page.
    Infer {
        url: String,
        /// Example links the pattern should match.
        #[arg(long = "hint")]
        hints: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    source_digest::init_tracing();

    let cli = Cli::parse();
    let cfg = AppConfig::load_default()?;
    let fetcher = HttpFetcher::new(&cfg.crawl)?;
    let bounds = cfg.crawl.bounds();

    match cli.command {
        Commands::Test { url, pattern } => {
            let body = fetcher.fetch(&url).await?;
            let re = compile_pattern(Some(&pattern))?;
            let found = extract_candidates(&body, &re);
            for (i, c) in found.iter().enumerate() {
                println!("{:>3}. {c}", i + 1);
            }
            match validate_match_count(found.len(), bounds) {
                Ok(()) => println!("{} candidate(s); pattern is usable", found.len()),
                Err(e) => println!("{} candidate(s); pattern rejected: {e}", found.len()),
            }
        }
        Commands::Infer { url, hints } => {
            let body = fetcher.fetch(&url).await?;
            let llm = build_client_from_config(&cfg.llm)?;
            let inferred = infer_pattern(
                llm.as_ref(),
                &body,
                &hints,
                bounds,
                RetryBudget::from_settings(&cfg.llm),
            )
            .await?;
            println!("pattern: {}", inferred.pattern);
            println!("matches: {}", inferred.match_count);
            for c in &inferred.preview {
                println!("  {c}");
            }
        }
    }
    Ok(())
}
