//! Cluster status command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ClusterStatus, Node};
use crate::output::{
    color_status, format_timestamp, print_error, print_json, print_rows, print_success,
    print_warning, yes_no, OutputFormat,
};

/// Row for nodes table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Connected")]
    connected: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Connections")]
    connections: u64,
    #[tabled(rename = "Lag")]
    lag: String,
}

impl NodeRow {
    fn new(node: &Node, is_primary: bool) -> Self {
        Self {
            node: format!("{}:{}", node.host, node.port),
            role: color_status(&node.role),
            connected: yes_no(node.connected),
            memory: format!("{:.1}%", node.memory_usage),
            connections: node.connections,
            lag: if is_primary {
                "-".to_string()
            } else {
                format!("{}s", node.replication_lag)
            },
        }
    }
}

/// Show the last polled cluster status
pub async fn show_cluster(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let Some(status) = client.get_optional::<ClusterStatus>("api/v1/cluster").await? else {
        print_warning("Cluster has not been polled yet");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!(
                "{} {}:{}  (checked {})",
                "Primary".bold(),
                status.primary_host,
                status.primary_port,
                format_timestamp(&status.checked_at)
            );

            let rows = std::iter::once(NodeRow::new(&status.primary, true))
                .chain(status.replicas.iter().map(|r| NodeRow::new(r, false)))
                .collect();
            print_rows(rows);

            println!(
                "Total memory: {:.1}%  Total connections: {}",
                status.total_memory, status.total_connections
            );

            if status.is_healthy {
                print_success("Cluster healthy");
            } else if status.failover_needed {
                print_error("Failover needed:");
                for reason in &status.failover_reasons {
                    println!("  - {}", reason);
                }
            } else {
                print_warning("Cluster degraded");
            }
        }
    }

    Ok(())
}
