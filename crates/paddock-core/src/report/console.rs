use crate::engine::runner::RunReport;
use crate::model::TaskState;
use crate::validate::ValidationReport;

pub fn print_run_summary(report: &RunReport) {
    eprintln!(
        "\nPipeline '{}' run #{} (as of {}, {})",
        report.pipeline,
        report.run_id,
        report.as_of,
        report.phase.map(|p| p.as_str()).unwrap_or("ungated"),
    );

    let (mut ok, mut failed, mut skipped) = (0, 0, 0);
    for t in &report.tasks {
        let attempts = if t.attempts > 1 {
            format!(" ({} attempts)", t.attempts)
        } else {
            String::new()
        };
        match t.state {
            TaskState::Succeeded => {
                ok += 1;
                eprintln!(
                    "✅ {:<22} {}{}",
                    t.name,
                    t.output.as_deref().unwrap_or(""),
                    attempts
                );
            }
            TaskState::Failed => {
                failed += 1;
                eprintln!(
                    "❌ {:<22} {}{}",
                    t.name,
                    t.reason.as_deref().unwrap_or("failed"),
                    attempts
                );
            }
            TaskState::Skipped => {
                skipped += 1;
                let icon = if t.gated { "💤" } else { "⏭️ " };
                eprintln!("{} {:<22} {}", icon, t.name, t.reason.as_deref().unwrap_or(""));
            }
            _ => eprintln!("❓ {:<22} {}", t.name, t.state.as_str()),
        }
    }

    eprintln!(
        "\nSummary: {} succeeded, {} failed, {} skipped in {:.1}s -> {}",
        ok,
        failed,
        skipped,
        report.duration_ms as f64 / 1000.0,
        report.status.as_str().to_uppercase()
    );
}

pub fn print_validation_summary(report: &ValidationReport) {
    for o in &report.outcomes {
        let observed = o
            .observed
            .map(|v| format!("{}", v))
            .unwrap_or_else(|| "-".into());
        if o.passed {
            eprintln!("✅ {:<34} {}", o.rule, observed);
        } else {
            eprintln!(
                "❌ {:<34} {}  {}",
                o.rule,
                observed,
                o.message.as_deref().unwrap_or("")
            );
        }
    }
    let failed = report.failed_rules().len();
    eprintln!(
        "\nValidation: {} rule(s), {} failed",
        report.outcomes.len(),
        failed
    );
}
