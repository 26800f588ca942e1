use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use curatrs::core::aggregate::{digest_summaries, DuplicateSummary};
use curatrs::core::detect::{DetectOptions, DetectionRun};
use curatrs::core::duplicate::PerceptualDetector;
use curatrs::core::merge::{read_history, DatasetMerger, SuppressionScope};
use curatrs::core::ranking::build_split;
use curatrs::core::scoring::{score_dataset, subcluster_medians, CommandScorer};
use curatrs::progress::{bar, benchmark};
use curatrs::PipelineConfig;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "curatrs", version, about = "CLI for curating hierarchical image datasets")]
struct Cli {
    /// Config file (default: <config dir>/curatrs/config.json if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Worker threads (default: one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Duplicate workflows
    Duplicates {
        #[command(subcommand)]
        command: Dups,
    },

    /// Copy every non-duplicate file into one output tree
    Merge {
        /// Dataset roots to merge
        #[arg(short, long = "root", value_name = "DIR", required = true)]
        roots: Vec<PathBuf>,
        /// Output root
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        /// Which duplicate files suppress a topic's files
        #[arg(long, value_enum, default_value_t = SuppressionScope::Subcluster)]
        scope: SuppressionScope,
    },

    /// Aesthetic score workflows
    Aesthetic {
        #[command(subcommand)]
        command: AestheticCmd,
    },

    /// Build train/validation manifests from a scored, deduplicated tree
    Split {
        /// Root of the merged dataset
        #[arg(short, long, value_name = "DIR")]
        root: PathBuf,
        /// Images per topic for training
        #[arg(long)]
        train: Option<usize>,
        /// Images per topic for validation
        #[arg(long)]
        valid: Option<usize>,
        #[arg(long, value_name = "FILE", default_value = "train_set.json")]
        train_out: PathBuf,
        #[arg(long, value_name = "FILE", default_value = "valid_set.json")]
        valid_out: PathBuf,
    },

    /// Work with merge history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum Dups {
    /// Find duplicates in every topic and write per-dataset summaries
    Detect {
        /// Dataset roots to scan
        #[arg(short, long = "root", value_name = "DIR", required = true)]
        roots: Vec<PathBuf>,
        /// Where summary files are written
        #[arg(long, value_name = "DIR", default_value = ".")]
        report_dir: PathBuf,
        /// Recompute topics that already have a duplicate file
        #[arg(long)]
        force: bool,
    },

    /// Combine several duplicate summaries
    Summarize {
        /// `duplicates_summary_*.json` files
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum AestheticCmd {
    /// Score every topic lacking a score file with an external program
    Score {
        #[arg(short, long, value_name = "DIR")]
        root: PathBuf,
        /// Program printing one score for the image path given as last argument
        #[arg(long, value_name = "PROGRAM")]
        command: String,
        /// Extra arguments passed before the image path
        #[arg(long = "arg", value_name = "ARG")]
        args: Vec<String>,
        /// Rescore topics that already have a score file
        #[arg(long)]
        force: bool,
    },

    /// Rank subclusters by median aesthetic score
    Stats {
        #[arg(short, long = "root", value_name = "DIR", required = true)]
        roots: Vec<PathBuf>,
        /// How many subclusters to show at each end
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all merge history records
    List {
        /// Output root of previous merges
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(threads) = cli.threads {
        config.workers = Some(threads);
    }
    config.validate()?;
    if let Some(workers) = config.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()
            .context("Failed to configure worker pool")?;
    }

    match cli.command {
        Commands::Duplicates { command } => match command {
            Dups::Detect {
                roots,
                report_dir,
                force,
            } => detect(&config, &roots, &report_dir, force)?,

            Dups::Summarize { files } => {
                let mut summaries = Vec::new();
                for file in &files {
                    println!("🔍 Reading: {}", file.display());
                    match read_summary(file) {
                        Ok(summary) => summaries.push(summary),
                        Err(err) => eprintln!("❌ Failed to read {}: {:#}", file.display(), err),
                    }
                }
                let digest = digest_summaries(&summaries);
                println!("\n📊 Duplicates Aggregated Stats:");
                println!("   Summaries read: {}/{}", digest.files_read, files.len());
                println!("   Total images: {}", digest.total_images);
                println!(
                    "   Total duplicate images: {}",
                    digest.total_duplicate_images
                );
                println!(
                    "   Median total images per cluster: {}",
                    digest.median_cluster_images
                );
                println!(
                    "   Median duplicate images per cluster: {}",
                    digest.median_cluster_duplicates
                );
            }
        },

        Commands::Merge {
            roots,
            output,
            scope,
        } => {
            println!("▶ Merging {} root(s) into: {}", roots.len(), output.display());
            let merger = DatasetMerger::new(&output, scope).with_progress(bar("Merging"));
            let report = benchmark("merging", || merger.merge(&roots))?;
            println!("\n✅ Copied {} file(s)", report.copied);
            println!("   Already present: {}", report.already_present);
            println!("   Suppressed duplicates: {}", report.suppressed);
            if report.failed > 0 {
                println!("   ⚠️  Failed copies: {}", report.failed);
            }
        }

        Commands::Aesthetic { command } => match command {
            AestheticCmd::Score {
                root,
                command,
                args,
                force,
            } => {
                println!("▶ Scoring topics in: {}", root.display());
                let scorer = CommandScorer::new(command, args);
                let report = benchmark("scoring", || {
                    score_dataset(&root, &scorer, &config, force, bar("Scoring"))
                })
                .with_context(|| format!("Cannot list dataset root {:?}", root))?;
                println!(
                    "\n✅ Scored {} topic(s), {} image(s); skipped {} topic(s), {} image(s) failed",
                    report.topics_scored,
                    report.images_scored,
                    report.topics_skipped,
                    report.images_failed
                );
            }

            AestheticCmd::Stats { roots, top } => {
                let medians = subcluster_medians(&roots, &config);
                if medians.is_empty() {
                    println!("No aesthetic scores found.");
                    return Ok(());
                }
                println!("\n🏆 Top {} subclusters by median aesthetic score:", top);
                for score in medians.iter().take(top) {
                    println!("   {} → median: {:.3}", score.label, score.median);
                }
                println!("\n📉 Bottom {} subclusters by median aesthetic score:", top);
                let skip = medians.len().saturating_sub(top);
                for score in medians.iter().skip(skip) {
                    println!("   {} → median: {:.3}", score.label, score.median);
                }
            }
        },

        Commands::Split {
            root,
            train,
            valid,
            train_out,
            valid_out,
        } => {
            if let Some(train) = train {
                config.split.train = train;
            }
            if let Some(valid) = valid {
                config.split.validation = valid;
            }
            println!("▶ Building split from: {}", root.display());
            let manifest = benchmark("ranking", || build_split(&root, &config, bar("Ranking")))
                .with_context(|| format!("Cannot list dataset root {:?}", root))?;
            manifest
                .save(&train_out, &valid_out)
                .with_context(|| format!("Failed to write {:?} / {:?}", train_out, valid_out))?;
            println!("✅ Train set: {} images → {}", manifest.train.len(), train_out.display());
            println!(
                "✅ Valid set: {} images → {}",
                manifest.validation.len(),
                valid_out.display()
            );
        }

        Commands::History { command } => match command {
            HistoryCmd::List { output } => {
                let records = read_history(&output)
                    .with_context(|| format!("Could not open merge history in {:?}", output))?;
                println!("🗂️  Merge History:");
                for (i, rec) in records.iter().enumerate() {
                    println!(
                        "[{}] {}\n     roots: {:?}\n     scope: {:?}\n     copied: {}, present: {}, suppressed: {}, failed: {}\n",
                        i,
                        rec.timestamp,
                        rec.roots,
                        rec.scope,
                        rec.report.copied,
                        rec.report.already_present,
                        rec.report.suppressed,
                        rec.report.failed
                    );
                }
            }
        },
    }

    Ok(())
}

fn detect(config: &PipelineConfig, roots: &[PathBuf], report_dir: &Path, force: bool) -> Result<()> {
    if !roots.iter().any(|root| root.is_dir()) {
        anyhow::bail!("None of the dataset roots exist: {:?}", roots);
    }
    fs::create_dir_all(report_dir)
        .with_context(|| format!("Failed to create directory {:?}", report_dir))?;

    let detector = PerceptualDetector::new(config);
    for root in roots {
        if !root.is_dir() {
            log::warn!("Skipping missing dataset root {}", root.display());
            continue;
        }
        println!("▶ Scanning for duplicates in: {}", root.display());
        let run = DetectionRun::new(&detector, DetectOptions { force })
            .with_progress(bar("Hashing topics"));
        let detection = match benchmark("hashing all topics", || run.run(root)) {
            Ok(detection) => detection,
            Err(e) => {
                log::error!("Cannot list dataset root {}: {}", root.display(), e);
                continue;
            }
        };

        let summary = detection.report.summary();
        let summary_path = report_dir.join(format!("duplicates_summary_{}.json", detection.name));
        write_json(&summary_path, &summary)?;
        let listing_path = report_dir.join(format!("all_duplicates_{}.json", detection.name));
        write_json(&listing_path, &detection.report.listing())?;

        println!(
            "   Topics: {} hashed, {} reused, {} failed",
            detection.topics_scanned, detection.topics_reused, detection.topics_failed
        );
        println!("{}", serde_json::to_string_pretty(&summary)?);
        println!("✅ Wrote {}", summary_path.display());
    }
    Ok(())
}

fn read_summary(path: &Path) -> Result<DuplicateSummary> {
    let text = fs::read_to_string(path).with_context(|| format!("Could not open {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Malformed summary {:?}", path))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}
