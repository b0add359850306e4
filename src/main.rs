use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use academic_record::db::SqliteStore;
use academic_record::persist::parse_artifact_text;
use academic_record::{
    projector, report, Artifact, CacheService, EmulatorFetcher, HttpFetcher, HttpFetcherConfig,
    RawDataFetcher,
};

#[derive(Parser)]
#[command(name = "academic-record")]
#[command(about = "Student academic record and study habits viewer for Group Scholar", long_about = None)]
struct Cli {
    /// Base URL of the student API
    #[arg(long, global = true, env = "ACADEMIC_API_URL", default_value = "http://localhost:5173/api")]
    api_url: String,
    /// Serve student data from a database-emulator JSON file instead of the API
    #[arg(long, global = true, env = "ACADEMIC_EMULATOR_FILE")]
    emulator: Option<PathBuf>,
    /// Local storage for saved artifacts
    #[arg(long, global = true, env = "ACADEMIC_STORE_URL", default_value = "sqlite://academic-record.db")]
    store: String,
    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the local storage schema
    InitStore,
    /// Check that a raw result file has the expected shape
    Validate {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print profile, degrees, courses and GPA summary as JSON
    Performance { student_id: String },
    /// Print study-habit statistics as JSON
    Habits { student_id: String },
    /// Generate a markdown report
    Report {
        student_id: String,
        #[arg(long, default_value = "academic-report.md")]
        out: PathBuf,
    },
    /// Manage saved AI artifacts
    Artifact {
        #[command(subcommand)]
        action: ArtifactAction,
    },
    /// Drop cached data for a student and fetch it again
    Refresh { student_id: String },
    /// Remove every saved artifact
    Clear,
}

#[derive(Subcommand)]
enum ArtifactAction {
    /// Save collaborator output (plain or fenced JSON) for a student
    Save {
        student_id: String,
        #[arg(value_enum)]
        kind: ArtifactKind,
        #[arg(long)]
        file: PathBuf,
    },
    Show {
        student_id: String,
        #[arg(value_enum)]
        kind: ArtifactKind,
    },
    Delete {
        student_id: String,
        #[arg(value_enum)]
        kind: ArtifactKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ArtifactKind {
    Insights,
    Roadmap,
}

impl From<ArtifactKind> for Artifact {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Insights => Artifact::AiInsights,
            ArtifactKind::Roadmap => Artifact::CourseRoadmap,
        }
    }
}

fn build_fetcher(cli: &Cli) -> anyhow::Result<Arc<dyn RawDataFetcher>> {
    if let Some(path) = &cli.emulator {
        let fetcher = EmulatorFetcher::from_path(path)
            .with_context(|| format!("failed to load emulator file {}", path.display()))?;
        return Ok(Arc::new(fetcher));
    }
    let fetcher = HttpFetcher::new(HttpFetcherConfig {
        base_url: cli.api_url.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
    })
    .context("failed to build HTTP client")?;
    Ok(Arc::new(fetcher))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Commands::Validate { file } = &cli.command {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let rows: serde_json::Value = serde_json::from_str(&text).context("file is not valid JSON")?;
        let validation = projector::validate(&rows);
        if validation.is_valid {
            println!("Data is valid.");
        } else {
            for error in &validation.errors {
                println!("- {error}");
            }
        }
        return Ok(());
    }

    let store = SqliteStore::connect(&cli.store)
        .await
        .with_context(|| format!("failed to open local storage at {}", cli.store))?;
    let fetcher = build_fetcher(&cli)?;
    let cache = CacheService::open(fetcher, Arc::new(store)).await;

    match cli.command {
        Commands::Validate { .. } => {}
        Commands::InitStore => {
            println!("Local storage ready.");
        }
        Commands::Performance { student_id } => {
            let overview = cache.performance(&student_id).await?;
            println!("{}", serde_json::to_string_pretty(&*overview)?);
        }
        Commands::Habits { student_id } => {
            let habits = cache.study_habits(&student_id).await?;
            println!("{}", serde_json::to_string_pretty(&*habits)?);
        }
        Commands::Report { student_id, out } => {
            let overview = cache.performance(&student_id).await?;
            let habits = cache.study_habits(&student_id).await?;
            let report = report::build_report(&overview, &habits);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Artifact { action } => match action {
            ArtifactAction::Save {
                student_id,
                kind,
                file,
            } => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let value = parse_artifact_text(&text).context("artifact is not valid JSON")?;
                cache.save_artifact(&student_id, kind.into(), value).await;
                println!("Saved {} for {student_id}.", Artifact::from(kind));
            }
            ArtifactAction::Show { student_id, kind } => {
                match cache.artifact(&student_id, kind.into()) {
                    Some(value) => println!("{}", serde_json::to_string_pretty(&*value)?),
                    None => println!("No {} saved for {student_id}.", Artifact::from(kind)),
                }
            }
            ArtifactAction::Delete { student_id, kind } => {
                cache.delete_artifact(&student_id, kind.into()).await;
                println!("Deleted {} for {student_id}.", Artifact::from(kind));
            }
        },
        Commands::Refresh { student_id } => {
            cache.force_refresh(&student_id).await?;
            println!("Refreshed data for {student_id}.");
        }
        Commands::Clear => {
            cache.clear_all().await;
            println!("Cleared all saved artifacts.");
        }
    }

    Ok(())
}
