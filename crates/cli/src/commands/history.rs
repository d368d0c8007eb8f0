//! `phpa get history`

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ModelHistory};
use crate::output::{
    color_status, format_replicas, format_time, print_info, print_json, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Traffic")]
    value: String,
}

/// Split `namespace/name`; a bare name uses `default_namespace`
pub fn parse_target(target: &str, default_namespace: &str) -> Result<(String, String)> {
    match target.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns.to_string(), name.to_string()))
        }
        Some(_) => anyhow::bail!("invalid autoscaler `{}`, expected namespace/name", target),
        None if !target.is_empty() => Ok((default_namespace.to_string(), target.to_string())),
        None => anyhow::bail!("autoscaler name must not be empty"),
    }
}

pub async fn get_history(
    client: &ApiClient,
    target: &str,
    default_namespace: &str,
    model_type: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let (namespace, name) = parse_target(target, default_namespace)?;
    let autoscaler = client
        .get_autoscaler(&namespace, &name)
        .await
        .with_context(|| format!("Failed to fetch autoscaler {}/{}", namespace, name))?;

    let histories: Vec<&ModelHistory> = autoscaler
        .status
        .model_histories
        .iter()
        .filter(|h| {
            model_type
                .as_ref()
                .map(|t| h.model_type.eq_ignore_ascii_case(t))
                .unwrap_or(true)
        })
        .collect();

    if let OutputFormat::Json = format {
        return print_json(&histories);
    }

    println!("{}", "Model History".bold());
    println!("{}", "=".repeat(60));
    println!("Autoscaler: {}/{}", namespace.cyan(), name.cyan());
    println!(
        "Replicas:   {} current, {} desired",
        autoscaler.status.current_replicas,
        format_replicas(autoscaler.status.desired_replicas)
    );

    for status in &autoscaler.status.model_statuses {
        println!(
            "Model {}:  {} (predicted {}, at {})",
            status.name.cyan(),
            color_status(&status.condition),
            format_replicas(status.predicted_replicas),
            format_time(status.last_prediction_time.as_ref())
        );
        if let Some(err) = &status.last_error {
            println!("  last error [{}]: {}", err.kind.red(), err.message);
        }
    }

    if histories.is_empty() {
        println!();
        print_warning("No history recorded yet");
        return Ok(());
    }

    for history in histories {
        println!();
        print_info(&format!(
            "{} history ({} samples, newest first)",
            history.model_type,
            history.samples.len()
        ));

        let mut samples = history.samples.clone();
        samples.sort_by(|a, b| b.time.cmp(&a.time));
        let rows: Vec<SampleRow> = samples
            .iter()
            .map(|s| SampleRow {
                time: format_time(Some(&s.time)),
                value: format!("{:.2}", s.value),
            })
            .collect();

        let table = tabled::Table::new(rows)
            .with(tabled::settings::Style::rounded())
            .to_string();
        println!("{}", table);
    }

    Ok(())
}
