//! Mangascribe CLI - manga chapter downloader and transcriber.

use anyhow::{Context, Result};
use clap::Parser;
use mangascribe::config::{Config, ResolveStrategy, TranscriptionMode};
use mangascribe::console::Console;
use mangascribe::{
    ChapterAssembler, ChapterPipeline, ChapterQuery, ChapterResolver, CharacterBank,
    HttpImageFetcher, MangaDexClient, PageLocator, PageStatus, TranscriptionAdapter, VisionModel,
};
use std::path::PathBuf;

/// Manga chapter downloader and transcriber.
#[derive(Parser, Debug)]
#[command(name = "mangascribe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MangaDex manga UUID.
    manga_id: String,

    /// Chapter label, e.g. "12" or "12.5".
    chapter: String,

    /// How to look the chapter up (overrides config).
    #[arg(long, value_enum)]
    strategy: Option<ResolveStrategy>,

    /// Transcribe the whole chapter at once or page by page (overrides config).
    #[arg(long, value_enum)]
    mode: Option<TranscriptionMode>,

    /// Directory of named character reference images (overrides config).
    #[arg(long)]
    character_bank: Option<PathBuf>,

    /// Translated language of the chapter (overrides config).
    #[arg(long)]
    language: Option<String>,

    /// Also write the transcript to this file.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Use this config file instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let console = Console::new();

    console.section("Mangascribe - Chapter Transcriber");

    // Load configuration
    console.step("Loading configuration...");
    let (loaded, config_path) = match &args.config {
        Some(path) => (Config::load_from(path), path.clone()),
        None => (Config::load(), Config::config_path()?),
    };
    let mut config = loaded.context("Failed to load configuration")?;

    // Check if this is first run (API key not configured)
    if !config.model.is_configured() {
        console.warning(&format!(
            "Model API key not configured. Please edit: {}",
            config_path.display()
        ));
        console.info("Set your OpenAI-compatible API key in the config file and run again.");
        return Ok(());
    }

    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;
    console.success("Configuration loaded");

    let console = console.with_debug(config.fetching.debug);

    let bank = match &config.transcription.character_bank_dir {
        Some(dir) if config.transcription.mode == TranscriptionMode::WholeChapter => {
            let bank = CharacterBank::load_dir(dir).context("Failed to load character bank")?;
            console.info(&format!("Loaded {} reference characters", bank.len()));
            bank
        }
        Some(_) => {
            console.warning("Character bank is only used in whole-chapter mode, ignoring it");
            CharacterBank::default()
        }
        None => CharacterBank::default(),
    };

    let client = MangaDexClient::new(config.api.clone(), console.clone())
        .context("Failed to create API client")?;
    let fetcher = HttpImageFetcher::new(config.fetching.timeout())
        .context("Failed to create image fetcher")?;
    let model = VisionModel::new(
        config.model.clone(),
        config.prompts.clone(),
        &config.transcription,
        console.clone(),
    )
    .context("Failed to create transcription model")?;

    let pipeline = ChapterPipeline::new(
        ChapterResolver::new(client.clone(), config.api.resolve_strategy),
        ChapterAssembler::new(
            PageLocator::new(client),
            Box::new(fetcher),
            config.fetching.clone(),
            console.clone(),
        ),
        TranscriptionAdapter::from_mode(config.transcription.mode, model, bank),
        console.clone(),
    );

    let query = ChapterQuery::new(&args.manga_id, &args.chapter);
    let run = pipeline
        .run(&query)
        .await
        .context("Failed to process chapter")?;

    console.section(&format!("Transcript of chapter {}", query.chapter_label));
    console.transcript(&run.transcript);

    if let Some(path) = &args.output {
        tokio::fs::write(path, run.transcript.render())
            .await
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        console.success(&format!("Transcript written to {}", path.display()));
    }

    let pages = run.transcript.pages();
    let transcribed = pages
        .iter()
        .filter(|p| p.status == PageStatus::Transcribed)
        .count();
    let transcription_failed = pages
        .iter()
        .filter(|p| p.status == PageStatus::TranscriptionFailed)
        .count();

    console.section("Done!");
    console.info(&format!(
        "{} pages: {} transcribed, {} not fetched, {} failed transcription",
        pages.len(),
        transcribed,
        run.fetch_failures.len(),
        transcription_failed
    ));

    Ok(())
}

/// Applies command line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(strategy) = args.strategy {
        config.api.resolve_strategy = strategy;
    }
    if let Some(mode) = args.mode {
        config.transcription.mode = mode;
    }
    if let Some(dir) = &args.character_bank {
        config.transcription.character_bank_dir = Some(dir.clone());
    }
    if let Some(language) = &args.language {
        config.api.language = language.clone();
    }
}
