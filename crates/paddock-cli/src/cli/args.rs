use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "paddock",
    version,
    about = "Race data pipeline: ingestion, Elo ratings, win predictions"
)]
pub struct Cli {
    #[arg(long, global = true, default_value = "paddock.yaml", env = "PADDOCK_CONFIG")]
    pub config: PathBuf,

    /// Overrides `database.path` from the config file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// tracing filter directive, e.g. `info` or `paddock_core=debug`
    #[arg(long, global = true, default_value = "info", env = "PADDOCK_LOG")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one ingestion cycle (calendar, results, weather, ratings, predictions)
    Run(RunArgs),
    /// Re-ingest a full season, ignoring the season gate
    Backfill(BackfillArgs),
    /// Evaluate the validation rules against the store
    Validate(ValidateArgs),
    /// Score finished races and purge expired predictions
    Maintain(MaintainArgs),
    /// Run the pipelines on their cron schedules until interrupted
    Serve,
    /// Write a sample config file
    Init,
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// As-of date (YYYY-MM-DD); defaults to today (UTC)
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BackfillArgs {
    #[arg(long)]
    pub season: i32,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub date: Option<NaiveDate>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MaintainArgs {
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_date() {
        let cli = Cli::try_parse_from(["paddock", "run", "--date", "2025-06-03"]).unwrap();
        match cli.cmd {
            Command::Run(args) => {
                assert_eq!(args.date, NaiveDate::from_ymd_opt(2025, 6, 3));
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from("paddock.yaml"));
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "paddock",
            "backfill",
            "--season",
            "2023",
            "--db",
            "/tmp/x.db",
            "--log-format",
            "text",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(matches!(cli.cmd, Command::Backfill(BackfillArgs { season: 2023 })));
    }

    #[test]
    fn rejects_bad_dates() {
        assert!(Cli::try_parse_from(["paddock", "run", "--date", "2025-13-40"]).is_err());
        assert!(Cli::try_parse_from(["paddock", "backfill"]).is_err());
    }
}
