//! Apply export retention to every staging root
//!
//! Meant for cron: each staging root is pruned under its own lock, so a root
//! with an export in flight is skipped rather than raced.

use catalog_export::Config;
use catalog_export::staging;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "catalog-export-prune", version, about = "Remove old export jobs")]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, env = "CATALOG_EXPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Once a staging root holds this many jobs, remove the oldest `--batch` of
    /// them (default: from config)
    #[arg(long)]
    threshold: Option<usize>,

    /// How many of the oldest jobs to remove when the threshold is reached
    /// (default: from config)
    #[arg(long)]
    batch: Option<usize>,

    /// Also remove jobs older than this many hours
    #[arg(long)]
    older_than_hours: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let threshold = args.threshold.unwrap_or(config.export.purge_threshold);
    let batch = args.batch.unwrap_or(config.export.purge_batch);
    let max_age = args
        .older_than_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)));

    let summary = staging::prune_all(&config.export_root(), threshold, batch, max_age).await?;
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn threshold_help_describes_batch_removal() {
        Args::command().debug_assert();
        let command = Args::command();
        let threshold = command
            .get_arguments()
            .find(|arg| arg.get_id() == "threshold")
            .unwrap();
        let help = threshold.get_help().unwrap().to_string();
        assert!(help.contains("--batch"), "{help}");
        assert!(!help.contains("Keep at most"), "{help}");
    }

    #[test]
    fn retention_flags_parse() {
        let args = Args::try_parse_from([
            "catalog-export-prune",
            "--threshold",
            "5",
            "--batch",
            "2",
            "--older-than-hours",
            "72",
        ])
        .unwrap();
        assert_eq!(args.threshold, Some(5));
        assert_eq!(args.batch, Some(2));
        assert_eq!(args.older_than_hours, Some(72));
    }
}
