use super::args::*;
use chrono::{NaiveDate, Utc};
use paddock_core::config::{load_config, PipelineConfig};
use paddock_core::context::Services;
use paddock_core::engine::{DagRunner, RunRequest, Trigger};
use paddock_core::errors::ConfigError;
use paddock_core::pipelines::Pipeline;
use paddock_core::providers::http::client::ReqwestTransport;
use paddock_core::report::console::print_run_summary;
use paddock_core::storage::Store;
use std::path::Path;
use std::sync::Arc;

pub mod serve;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TASK_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let Cli {
        config, db, cmd, ..
    } = cli;
    match cmd {
        Command::Init => cmd_init(&config),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
        Command::Run(args) => {
            let Some(cfg) = load(&config, db.as_deref()) else {
                return Ok(exit_codes::CONFIG_ERROR);
            };
            let as_of = args.date.unwrap_or_else(today);
            run_pipeline(cfg, Pipeline::Ingestion, RunRequest::new(Trigger::Manual, as_of)).await
        }
        Command::Backfill(args) => {
            let Some(cfg) = load(&config, db.as_deref()) else {
                return Ok(exit_codes::CONFIG_ERROR);
            };
            run_pipeline(cfg, Pipeline::Backfill, RunRequest::backfill(args.season, today())).await
        }
        Command::Maintain(args) => {
            let Some(cfg) = load(&config, db.as_deref()) else {
                return Ok(exit_codes::CONFIG_ERROR);
            };
            let as_of = args.date.unwrap_or_else(today);
            run_pipeline(cfg, Pipeline::Maintenance, RunRequest::new(Trigger::Manual, as_of)).await
        }
        Command::Validate(args) => {
            let Some(cfg) = load(&config, db.as_deref()) else {
                return Ok(exit_codes::CONFIG_ERROR);
            };
            validate::run(cfg, args)
        }
        Command::Serve => {
            let Some(cfg) = load(&config, db.as_deref()) else {
                return Ok(exit_codes::CONFIG_ERROR);
            };
            serve::run(cfg).await
        }
    }
}

/// Exit code for an error that escaped `dispatch`.
///
/// Configuration problems are reported by `dispatch` itself; what reaches
/// here is a runtime failure (store unreadable, audit write failed) unless a
/// [`ConfigError`] is in the chain.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|c| c.downcast_ref::<ConfigError>().is_some()) {
        exit_codes::CONFIG_ERROR
    } else {
        exit_codes::TASK_FAILED
    }
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Loads the config and applies `--db`. Prints the error and returns `None`
/// on any configuration problem.
pub(crate) fn load(path: &Path, db: Option<&Path>) -> Option<PipelineConfig> {
    match load_config(path) {
        Ok(mut cfg) => {
            if let Some(db) = db {
                cfg.database.path = db.to_path_buf();
            }
            Some(cfg)
        }
        Err(e) => {
            eprintln!("config error: {}", e);
            None
        }
    }
}

pub(crate) fn open_store(cfg: &PipelineConfig) -> anyhow::Result<Store> {
    ensure_parent_dir(&cfg.database.path)?;
    let store = Store::open(&cfg.database.path)?;
    store.init_schema()?;
    Ok(store)
}

pub(crate) fn build_services(cfg: PipelineConfig) -> anyhow::Result<Services> {
    let store = open_store(&cfg)?;
    let transport = Arc::new(ReqwestTransport::new()?);
    Ok(Services::new(store, cfg, transport))
}

async fn run_pipeline(
    cfg: PipelineConfig,
    pipeline: Pipeline,
    req: RunRequest,
) -> anyhow::Result<i32> {
    let graph = match pipeline.graph() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("config error: pipeline '{}': {}", pipeline.as_str(), e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let runner = DagRunner::new(build_services(cfg)?);

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(event = "interrupt", "cancelling run; running tasks will finish");
            cancel.cancel();
        }
    });

    let report = runner.run(&graph, req).await?;
    print_run_summary(&report);
    if report.succeeded() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::TASK_FAILED)
    }
}

fn cmd_init(path: &Path) -> anyhow::Result<i32> {
    if path.exists() {
        eprintln!("note: {} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    ensure_parent_dir(path)?;
    std::fs::write(path, crate::templates::SAMPLE_CONFIG)?;
    eprintln!("created {}", path.display());
    Ok(exit_codes::OK)
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
