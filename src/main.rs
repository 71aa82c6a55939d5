use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventlens::{
    config, engine, Deadline, DirectoryStorage, Engine, EngineOptions, Error, MatchOptions,
    Pipeline, SimilarImages, StorageAdapter,
};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "eventlens")]
#[command(
    version,
    about = "Find every photo of you in an event's photo collection"
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload reference photos into a collection
    Upload {
        /// Collection (folder) name
        #[arg(short, long)]
        collection: String,
        /// Image files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Find photos in a collection containing a face from the query image
    Find {
        /// Collection (folder) name
        #[arg(short, long)]
        collection: String,
        /// Query image file
        #[arg(required_unless_present = "base64")]
        image: Option<PathBuf>,
        /// Read the query as base64 text (optionally a data URI) from this file
        #[arg(long, conflicts_with = "image")]
        base64: Option<PathBuf>,
        /// Minimum similarity for a match, in [-1, 1]
        #[arg(short, long, value_parser = parse_threshold, allow_negative_numbers = true)]
        threshold: Option<f32>,
        /// Keep only the best N matches
        #[arg(short, long)]
        limit: Option<usize>,
        /// Print the matches as JSON (images base64-encoded)
        #[arg(long)]
        json: bool,
        /// Write matched photos to this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the photos stored in a collection
    List {
        #[arg(short, long)]
        collection: String,
    },
    /// Remove a collection and all of its photos
    Purge {
        #[arg(short, long)]
        collection: String,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload { collection, files } => upload(&cfg, &collection, &files),
        Commands::Find {
            collection,
            image,
            base64,
            threshold,
            limit,
            json,
            output,
        } => {
            let query = match (image, base64) {
                (Some(path), _) => Query::File(path),
                (None, Some(path)) => Query::Base64(path),
                (None, None) => anyhow::bail!("a query image is required"),
            };
            let matching =
                MatchOptions::new(threshold.unwrap_or(cfg.threshold), limit.or(cfg.max_results))?;
            find(&cfg, &collection, query, matching, json, output.as_deref())
        }
        Commands::List { collection } => list(&cfg, &collection),
        Commands::Purge { collection } => purge(&cfg, &collection),
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn parse_threshold(raw: &str) -> std::result::Result<f32, String> {
    let threshold: f32 = raw.parse().map_err(|e| format!("{e}"))?;
    eventlens::matcher::validate_threshold(threshold).map_err(|e| e.to_string())
}

enum Query {
    File(PathBuf),
    Base64(PathBuf),
}

fn storage(cfg: &config::Config) -> Arc<DirectoryStorage> {
    Arc::new(DirectoryStorage::new(&cfg.storage_root))
}

fn build_engine(cfg: &config::Config) -> Result<Engine> {
    let pipeline = Pipeline::load(&cfg.model_paths(), cfg.detector_options())
        .context("Failed to initialize face recognition pipeline")?;
    Ok(Engine::new(
        Arc::new(pipeline),
        storage(cfg),
        EngineOptions::from(cfg),
    ))
}

fn upload(cfg: &config::Config, collection: &str, files: &[PathBuf]) -> Result<()> {
    let images = files
        .iter()
        .map(|f| std::fs::read(f).with_context(|| format!("reading {}", f.display())))
        .collect::<Result<Vec<_>>>()?;

    // Uploading needs no models; decode and re-encode only
    let storage = storage(cfg);
    let deadline = Deadline::new(cfg.request_timeout());
    let stored = engine::upload_images(
        storage.as_ref(),
        collection,
        &images,
        cfg.jpeg_quality,
        &deadline,
    )
    .context("Failed to upload images")?;

    info!("✓ {} images uploaded successfully to {}", stored.len(), collection);
    for id in stored {
        println!("{id}");
    }
    Ok(())
}

fn find(
    cfg: &config::Config,
    collection: &str,
    query: Query,
    matching: MatchOptions,
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let engine = build_engine(cfg)?.with_matching(matching);

    let result = match &query {
        Query::File(path) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            engine.find_similar(collection, &bytes)
        }
        Query::Base64(path) => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            engine.find_similar_base64(collection, &payload)
        }
    };

    let matches = match result {
        Ok(matches) => matches,
        Err(Error::NoFaceDetected) => {
            anyhow::bail!("No face detected in the query image. Please use a clear, well-lit photo.")
        }
        Err(e) => return Err(e).context("Failed to match faces"),
    };

    if matches.is_empty() {
        info!("No similar faces found in {collection}");
    }

    if let Some(dir) = output {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        for m in &matches {
            let path = dir.join(&m.identifier).with_extension("jpg");
            std::fs::write(&path, &m.jpeg)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    if json {
        let body = SimilarImages {
            similar_images: matches,
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        for m in &matches {
            println!("{}\tSimilarity: {}", m.identifier, m.display_similarity);
        }
    }
    Ok(())
}

fn list(cfg: &config::Config, collection: &str) -> Result<()> {
    let ids = storage(cfg)
        .list(collection)
        .context("Failed to list collection")?;
    if ids.is_empty() {
        warn!("Collection {collection} is empty");
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

fn purge(cfg: &config::Config, collection: &str) -> Result<()> {
    info!("Purging collection: {}", collection);
    storage(cfg)
        .purge(collection)
        .context("Failed to purge collection")?;
    info!("✓ Collection {} purged", collection);
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(config::CONFIG_PATH.as_path());
    if !path.exists() {
        config::save_config(&config::Config::default(), Some(path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", path.display());

    let status = std::process::Command::new(editor)
        .arg(path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
