use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::Level;

mod activity;
mod aggregate;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod report;
mod store;
mod view;

use aggregate::Dashboard;
use config::{Config, ConfigOverrides};
use store::Snapshot;
use view::{SortDirection, SortKey};

#[derive(Parser)]
#[command(name = "learning-dashboard")]
#[command(about = "Student summaries and teacher rosters over course progress", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the built-in demo data instead of Postgres
    #[arg(long, global = true)]
    demo: bool,
    /// Only build rosters for courses the teacher owns
    #[arg(long, global = true)]
    owned_only: bool,
    /// Link attempts to courses by title instead of course id
    #[arg(long, global = true)]
    legacy_attempt_match: bool,
    /// Log level (error, warn, info, debug, trace); overrides [logging] level
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the demo data into Postgres
    Seed,
    /// Import topic scores from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print a student's dashboard summary as JSON
    Student {
        #[arg(long)]
        student_id: String,
    },
    /// Print a teacher's course rosters as JSON
    Roster {
        #[arg(long)]
        teacher_id: String,
        /// Only show this course
        #[arg(long)]
        course: Option<String>,
        /// Case-insensitive name filter
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        #[arg(long)]
        desc: bool,
    },
    /// Generate a markdown roster report
    Report {
        #[arg(long)]
        teacher_id: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("invalid log level {level:?}"))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn load_dashboard(config: &Config, demo: bool) -> anyhow::Result<Dashboard<Snapshot>> {
    let snapshot = if demo {
        Snapshot::demo()
    } else {
        let pool = connect(config).await?;
        db::load_snapshot(&pool).await?
    };
    Ok(Dashboard::new(
        snapshot,
        config.aggregate_options(),
        config.activity_source(),
    ))
}

fn log_resolution_counts(dashboard: &Dashboard<Snapshot>) {
    let counts = dashboard.resolution_counts();
    if counts != aggregate::ResolutionCounts::default() {
        tracing::warn!(
            unresolved_teachers = counts.unresolved_teachers,
            unresolved_topics = counts.unresolved_topics,
            dropped_topics = counts.dropped_topics,
            "dashboard used fallback values"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        owned_only: cli.owned_only,
        legacy_attempt_match: cli.legacy_attempt_match,
        log_level: cli.log_level.clone(),
    };
    let config = Config::load(cli.config.as_deref(), &overrides)?;
    init_tracing(&config.logging.level)?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            let seeded = db::seed(&pool).await?;
            println!("Seed data inserted.");
            for (name, id) in seeded {
                println!("- {name}: {id}");
            }
        }
        Commands::Import { csv } => {
            let pool = connect(&config).await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} observations from {}.", csv.display());
        }
        Commands::Student { student_id } => {
            let dashboard = load_dashboard(&config, cli.demo).await?;
            let identity = auth::authenticate(dashboard.store(), &student_id)?;
            let summary = dashboard.student_view(&identity)?;
            log_resolution_counts(&dashboard);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Roster {
            teacher_id,
            course,
            filter,
            sort,
            desc,
        } => {
            let dashboard = load_dashboard(&config, cli.demo).await?;
            let identity = auth::authenticate(dashboard.store(), &teacher_id)?;
            let mut roster = dashboard.teacher_view(&identity)?;
            log_resolution_counts(&dashboard);

            if let Some(course) = course.as_deref() {
                view::select_course(&mut roster.courses, course);
                if roster.courses.is_empty() {
                    anyhow::bail!("course {course} is not visible to {teacher_id}");
                }
            }

            let direction = if desc {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            for course in &mut roster.courses {
                if let Some(needle) = filter.as_deref() {
                    course.students = view::filter_by_name(&course.students, needle);
                }
                if let Some(key) = sort {
                    view::sort_students(&mut course.students, key, direction);
                }
            }

            println!("{}", serde_json::to_string_pretty(&roster)?);
        }
        Commands::Report { teacher_id, out } => {
            let dashboard = load_dashboard(&config, cli.demo).await?;
            let identity = auth::authenticate(dashboard.store(), &teacher_id)?;
            let roster = dashboard.teacher_view(&identity)?;
            log_resolution_counts(&dashboard);

            let teacher = dashboard
                .store()
                .teachers
                .iter()
                .find(|t| t.id == identity.user_id)
                .map(|t| t.name.as_str())
                .unwrap_or(identity.user_id.as_str());
            let report = report::build_report(teacher, &roster);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
