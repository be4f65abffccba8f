//! Operator-requested failover

use anyhow::Result;

use crate::client::{ApiClient, Decision};
use crate::commands::decisions::DecisionRow;
use crate::output::{
    format_endpoint, print_info, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

/// Ask the governor to promote its best replica now
///
/// Nothing is sent unless `confirmed`; the promotion happens even when the
/// primary looks healthy.
pub async fn run_failover(client: &ApiClient, confirmed: bool, format: OutputFormat) -> Result<()> {
    if !confirmed {
        print_warning("This promotes a replica even if the primary is healthy. Rerun with --yes to proceed");
        return Ok(());
    }

    let decision: Decision = client.post("api/v1/failover").await?;

    match format {
        OutputFormat::Json => print_json(&decision)?,
        OutputFormat::Table => print_rows(vec![DecisionRow::from(&decision)]),
    }

    let candidate = decision
        .candidate
        .as_ref()
        .map(format_endpoint)
        .unwrap_or_else(|| "-".to_string());
    match decision.outcome.as_str() {
        "executed" => print_success(&format!("Promoted {}", candidate)),
        "dry_run" => print_info(&format!("Dry run: would promote {}", candidate)),
        "failed" | "escalated" | "skipped" => {
            let detail = decision.error.as_deref().unwrap_or(&decision.reason);
            anyhow::bail!("Failover {}: {}", decision.outcome, detail);
        }
        _ => print_info(&decision.reason),
    }

    Ok(())
}
