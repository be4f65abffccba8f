//! Governor health command

use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use crate::client::{ApiClient, Health, Readiness};
use crate::output::{
    color_status, print_error, print_json, print_rows, print_success, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show component health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: Health = client.get_health("healthz").await?;
    let readiness: Readiness = client.get_health("readyz").await?;

    match format {
        OutputFormat::Json => print_json(&json!({ "health": health, "readiness": readiness }))?,
        OutputFormat::Table => {
            let rows = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows);

            match health.status.as_str() {
                "healthy" => print_success("Governor healthy"),
                "degraded" => print_warning("Governor degraded"),
                other => print_error(&format!("Governor {}", other)),
            }

            if readiness.ready {
                print_success("Ready");
            } else {
                let reason = readiness.reason.as_deref().unwrap_or("unknown reason");
                print_warning(&format!("Not ready: {}", reason));
            }
        }
    }

    Ok(())
}
