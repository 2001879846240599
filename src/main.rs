use clap::{Parser, Subcommand};
use exam_results_engine::{
    config::{get_config, init_config},
    database::pool::{create_pool, run_migrations},
    AppState,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "exam-results", about = "Grades, aggregates and ranks exam results")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "EXAM_RESULTS_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute every result of an exam
    Recompute {
        exam_id: Uuid,
        /// Rebuild booklet keys even if they are up to date
        #[arg(long)]
        force_keys: bool,
    },
    /// Rebuild the booklet answer keys of an exam
    RebuildKeys { exam_id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    run_migrations(&pool).await?;

    let mut options = config.recompute_options();
    if let Command::Recompute { force_keys: true, .. } = cli.command {
        options.force_key_rebuild = true;
    }
    let state = AppState::new(pool, options);

    match cli.command {
        Command::Recompute { exam_id, .. } => {
            let report = state.recompute_service.recompute(exam_id).await?;
            info!(
                "Exam {}: {} participants graded over {} questions (keys rebuilt: {}, analytics queued: {})",
                report.exam_id,
                report.participant_count,
                report.gradable_questions,
                report.keys_rebuilt,
                report.analytics_enqueued
            );
            for test in &report.skipped_tests {
                tracing::warn!("Skipped test without answer key rows: {}", test);
            }
            let pending = state.queue_service.pending_for_exam(exam_id).await?;
            info!("{} analytics jobs pending for exam {}", pending, exam_id);
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
        }
        Command::RebuildKeys { exam_id } => {
            let report = state.booklet_key_service.rebuild(exam_id).await?;
            info!(
                "Exam {}: {} booklet keys written, {} tests skipped, fingerprint {}",
                report.exam_id,
                report.key_set.keys.len(),
                report.skipped.len(),
                report.key_set.fingerprint
            );
        }
    }

    Ok(())
}
