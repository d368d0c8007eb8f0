//! `phpa get autoscalers`

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, AutoscalerSummary};
use crate::output::{color_status, format_replicas, format_time, print_json, print_warning, OutputFormat};

#[derive(Tabled)]
struct AutoscalerRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Desired")]
    desired: String,
    #[tabled(rename = "Models")]
    models: String,
    #[tabled(rename = "Last Reconcile")]
    last_reconcile: String,
}

impl From<&AutoscalerSummary> for AutoscalerRow {
    fn from(summary: &AutoscalerSummary) -> Self {
        let models = summary
            .models
            .iter()
            .map(|m| {
                let condition = m.condition.as_deref().unwrap_or("Pending");
                format!("{} ({})", m.name, color_status(condition))
            })
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            namespace: summary.namespace.clone(),
            name: summary.name.clone(),
            current: summary.current_replicas.to_string(),
            desired: format_replicas(summary.desired_replicas),
            models,
            last_reconcile: format_time(summary.last_reconcile_time.as_ref()),
        }
    }
}

pub async fn get_autoscalers(
    client: &ApiClient,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let summaries = client.list_autoscalers(namespace.as_deref()).await?;

    match format {
        OutputFormat::Json => print_json(&summaries)?,
        OutputFormat::Table => {
            if summaries.is_empty() {
                print_warning("No autoscalers found");
                return Ok(());
            }

            let rows: Vec<AutoscalerRow> = summaries.iter().map(AutoscalerRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} autoscalers", summaries.len());
        }
    }

    Ok(())
}
