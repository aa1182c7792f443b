use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use freshpick::config::AppConfig;
use freshpick::core::filter::AdaptiveFilter;
use freshpick::core::matcher::{SimilarityMatcher, Verdict, similarity_percent};
use freshpick::core::record::PostId;
use freshpick::core::store::{DuplicateStore, ReadOnlyLog};
use freshpick::services::imaging::PerceptualPipeline;
use freshpick::services::mirror::{MirrorJob, PassOutcome};
use freshpick::services::publish::DirectoryPublisher;
use freshpick::services::schedule::{Scheduler, ThreadSleeper};
use freshpick::services::selection::search_depth_budget;
use freshpick::services::source::{FsImageFetcher, JsonFileSource};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "freshpick", version, about = "Mirror fresh, never-seen images from a ranked feed")]
struct Cli {
    /// Config file
    #[arg(short, long, value_name = "FILE", default_value = "conf.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repeatedly pick and publish a post
    Run {
        /// Ranked listing (JSON array of posts), re-read every run
        #[arg(long, value_name = "FILE")]
        candidates: PathBuf,
        /// Stop after a single pass
        #[arg(long)]
        once: bool,
    },

    /// Pick one unique post without publishing it
    Select {
        /// Ranked listing (JSON array of posts)
        #[arg(long, value_name = "FILE")]
        candidates: PathBuf,
        /// Override the computed search depth
        #[arg(long, value_name = "N")]
        depth: Option<usize>,
    },

    /// Inspect the post store
    Store {
        #[command(subcommand)]
        command: StoreCmd,
    },

    /// Show what the store would say about every mirrored image
    Probe {
        /// Directory to probe (default: the configured mirror directory)
        #[arg(short, long, value_name = "DIR")]
        path: Option<PathBuf>,
        /// Store file (default: from config)
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum StoreCmd {
    /// Print record counts
    Stats {
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
    },

    /// Check whether a post ID was already processed
    Check {
        #[arg(long)]
        id: String,
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;

    match cli.command {
        Commands::Run { candidates, once } => run(&config, &candidates, once),
        Commands::Select { candidates, depth } => select(&config, &candidates, depth),
        Commands::Store { command } => match command {
            StoreCmd::Stats { store } => {
                let path = store.unwrap_or_else(|| config.store_path.clone());
                let store = inspect_store(&path)?;
                let stats = store.stats();
                println!("🗂️  Store {}", path.display());
                println!("   post IDs:       {}", stats.identities);
                println!("   strict hashes:  {}", stats.strict_hashes);
                println!("   fuzzy buckets:  {}", stats.buckets);
                if stats.skipped_lines + stats.skipped_fields > 0 {
                    println!(
                        "   ⚠️  skipped {} lines and {} fields while loading",
                        stats.skipped_lines, stats.skipped_fields
                    );
                }
                Ok(())
            }
            StoreCmd::Check { id, store } => {
                let path = store.unwrap_or_else(|| config.store_path.clone());
                let store = inspect_store(&path)?;
                let id = PostId::parse(&id)
                    .or_else(|| PostId::from_body(&id))
                    .with_context(|| format!("Invalid post id {:?}", id))?;
                if store.contains_identity(&id) {
                    println!("✅ {} was already processed", id);
                } else {
                    println!("✨ {} is new", id);
                }
                Ok(())
            }
        },
        Commands::Probe { path, store } => {
            let store_path = store.unwrap_or_else(|| config.store_path.clone());
            let dir = path.unwrap_or_else(|| config.images.mirror_dir.clone());
            probe(&config, &dir, &store_path)
        }
    }
}

fn open_store(path: &Path) -> Result<DuplicateStore> {
    DuplicateStore::open(path).with_context(|| format!("Failed to open store {:?}", path))
}

/// Loads the store for reading only; works while a `run` holds the lock.
fn inspect_store(path: &Path) -> Result<DuplicateStore<ReadOnlyLog>> {
    DuplicateStore::open_read_only(path)
        .with_context(|| format!("Failed to read store {:?}", path))
}

fn depth_budget(config: &AppConfig, store: &DuplicateStore) -> usize {
    let since = store
        .last_modified()
        .and_then(|t| SystemTime::now().duration_since(t).ok());
    search_depth_budget(config.analysis.speed, since)
}

fn run(config: &AppConfig, candidates: &Path, once: bool) -> Result<()> {
    let mut store = open_store(&config.store_path)?;
    let source = JsonFileSource::new(candidates);
    let fetcher = FsImageFetcher::new(&config.images.mirror_dir);
    let pipeline = PerceptualPipeline::new();
    let publisher = DirectoryPublisher::new(&config.publish.output_dir, config.publish.tags.clone());
    let job = MirrorJob {
        source: &source,
        fetcher: &fetcher,
        pipeline: &pipeline,
        publisher: &publisher,
        filter: AdaptiveFilter::new(config.filter_config()),
        matcher: SimilarityMatcher::new(config.matching.fuzzy_threshold),
    };

    let scheduler = Scheduler::new(config.interval(), once.then_some(1));
    let summary = scheduler.run(&mut ThreadSleeper, || -> Result<Option<()>> {
        let budget = depth_budget(config, &store);
        let outcome = job.run_once(&mut store, budget, Utc::now())?;
        report(&outcome);
        Ok(outcome.receipt().map(|_| ()))
    })?;

    println!(
        "\n✅ {} run(s), {} published, {} idle",
        summary.runs, summary.published, summary.idle
    );
    Ok(())
}

fn report(outcome: &PassOutcome) {
    match outcome {
        PassOutcome::Starved => println!("⚠️  No posts were usable for image mirroring."),
        PassOutcome::NoneQualified { samples } => {
            println!("⚠️  None of {} usable posts met the posting criteria.", samples)
        }
        PassOutcome::NoUnique { searched } => {
            println!("⚠️  No unique posts among the top {}.", searched)
        }
        PassOutcome::Published(receipt) => {
            println!("📤 Published {} → {}", receipt.post_id, receipt.location)
        }
    }
}

fn select(config: &AppConfig, candidates: &Path, depth: Option<usize>) -> Result<()> {
    use freshpick::services::selection::Selector;
    use freshpick::services::source::CandidateSource;

    let mut store = open_store(&config.store_path)?;
    let listing = JsonFileSource::new(candidates).fetch_candidates()?;
    let outcome = AdaptiveFilter::new(config.filter_config()).filter(&listing, Utc::now());
    if outcome.is_starved() {
        println!("⚠️  No posts were usable for image mirroring.");
        return Ok(());
    }
    println!(
        "▶ {} / {} posts met the posting criteria",
        outcome.admitted.len(),
        outcome.samples
    );

    let fetcher = FsImageFetcher::new(&config.images.mirror_dir);
    let pipeline = PerceptualPipeline::new();
    let selector = Selector::new(
        &fetcher,
        &pipeline,
        SimilarityMatcher::new(config.matching.fuzzy_threshold),
    );
    let budget = depth.unwrap_or_else(|| depth_budget(config, &store));
    match selector.select_unique(&outcome.admitted, &mut store, budget)? {
        Some(post) => {
            println!("🏆 {} at depth {}", post.candidate.id, post.depth);
            println!("   title: {}", post.candidate.title);
            println!("   image: {}", post.source_url);
            println!("   hash:  {}", post.strict);
        }
        None => println!("No unique posts were found."),
    }
    Ok(())
}

fn probe(config: &AppConfig, dir: &Path, store_path: &Path) -> Result<()> {
    let store = inspect_store(store_path)?;
    let images = FsImageFetcher::new(dir).mirrored_images();
    if images.is_empty() {
        println!("⚠️  No mirrored images under {}", dir.display());
        return Ok(());
    }

    let progress = ProgressBar::new(images.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner:.green} hashing [{bar:30}] {pos}/{len} ({elapsed})",
    )?);
    let pipeline = PerceptualPipeline::new();
    let hashed: Vec<_> = images
        .par_iter()
        .map(|path| {
            let result = image::open(path)
                .map_err(anyhow::Error::from)
                .and_then(|img| pipeline.hash_image(&img).map_err(anyhow::Error::from));
            progress.inc(1);
            (path, result)
        })
        .collect();
    progress.finish();

    let matcher = SimilarityMatcher::new(config.matching.fuzzy_threshold);
    let mut unique = 0;
    for (path, result) in hashed {
        match result {
            Ok((strict, fuzzy)) => match matcher.match_hashes(&store, &strict, &fuzzy) {
                Verdict::Unique => {
                    unique += 1;
                    println!("✨ {} is unique", path.display())
                }
                Verdict::ExactDuplicate => {
                    println!("🔁 {} matches a stored image exactly", path.display())
                }
                Verdict::FuzzyDuplicate { distance } => println!(
                    "🔍 {} is similar to a stored image ({:.2}%)",
                    path.display(),
                    similarity_percent(distance)
                ),
            },
            Err(e) => eprintln!("⚠️  Could not hash {}: {}", path.display(), e),
        }
    }
    println!("\n✅ {} / {} images are new to the store", unique, images.len());
    Ok(())
}
