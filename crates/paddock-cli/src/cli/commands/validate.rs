use super::{exit_codes, open_store, today};
use crate::cli::args::{OutputFormat, ValidateArgs};
use paddock_core::config::{PipelineConfig, RuleStage};
use paddock_core::report::console::print_validation_summary;
use paddock_core::validate::{RuleParams, ValidationEngine, ValidationReport};
use serde_json::json;

/// Runs every configured rule once, outside of any pipeline run.
pub fn run(cfg: PipelineConfig, args: ValidateArgs) -> anyhow::Result<i32> {
    let store = open_store(&cfg)?;
    let engine = ValidationEngine::from_config(&cfg.validation);
    let params = RuleParams {
        as_of: args.date.unwrap_or_else(today),
        model_version: cfg.predictions.model_version.clone(),
        rating_floor: cfg.elo.rating_floor,
    };

    let report = engine.run(&store, &params, RuleStage::All, None)?;
    print_report(&report, &params, args.format)?;

    if report.passed() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::TASK_FAILED)
    }
}

fn print_report(
    report: &ValidationReport,
    params: &RuleParams,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let output = json!({
                "schema_version": 1,
                "ok": report.passed(),
                "as_of": params.as_of.to_string(),
                "model_version": params.model_version,
                "failed": report.failed_rules(),
                "rules": report.outcomes,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => print_validation_summary(report),
    }
    Ok(())
}
