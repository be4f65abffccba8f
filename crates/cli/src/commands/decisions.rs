//! Decision journal commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{decisions_path, ApiClient, Decision};
use crate::output::{
    color_confidence, color_status, format_timestamp, format_topology, print_info, print_json,
    print_rows, print_warning, truncate, OutputFormat,
};

const REASON_WIDTH: usize = 60;

/// Row for decisions table
#[derive(Tabled)]
pub(crate) struct DecisionRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Lane")]
    lane: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Before")]
    before: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&Decision> for DecisionRow {
    fn from(d: &Decision) -> Self {
        // Errors are more useful than the rationale for failed records
        let reason = d.error.as_deref().unwrap_or(&d.reason);
        Self {
            id: d.id,
            time: format_timestamp(&d.timestamp),
            lane: d.lane.clone(),
            action: d.action.clone(),
            before: format_topology(d.before.as_ref()),
            after: format_topology(d.after.as_ref()),
            confidence: color_confidence(d.confidence),
            outcome: color_status(&d.outcome),
            reason: truncate(reason, REASON_WIDTH),
        }
    }
}

/// Show recent decisions, newest first
pub async fn show_decisions(
    client: &ApiClient,
    lane: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let decisions: Vec<Decision> = client.get(&decisions_path(lane.as_deref(), limit)).await?;

    match format {
        OutputFormat::Json => print_json(&decisions)?,
        OutputFormat::Table => {
            if decisions.is_empty() {
                print_warning("No decisions recorded yet");
                return Ok(());
            }

            print_rows(decisions.iter().map(DecisionRow::from).collect());
            print_info(&format!("{} decisions", decisions.len()));
        }
    }

    Ok(())
}
