use anyhow::Result;
use chrono::{DateTime, Utc};
use opwatch::core::models::{CacheStatus, NodeStatus};
use opwatch::core::settings::Settings;
use opwatch::exceptions::{self, ApplicationGroup, ExceptionTotals};
use opwatch::Dashboard;
use serde::Serialize;

#[derive(Serialize)]
struct StatusOutput {
    nodes: Vec<NodeStatus>,
    groups: Vec<ApplicationGroup>,
    totals: ExceptionTotals,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

pub async fn run(settings: &Settings, json: bool, node_filter: Option<String>) -> Result<()> {
    let dashboard = Dashboard::from_settings(settings)?;
    let registry = &dashboard.registry;

    if registry.is_empty() {
        anyhow::bail!("No exception stores configured. Check your configuration.");
    }

    let nodes = match &node_filter {
        Some(name) => {
            let Some(node) = registry.get(name) else {
                let known: Vec<&str> = registry.nodes().map(|n| n.name()).collect();
                anyhow::bail!("Unknown node: {}. Known nodes: {}", name, known.join(", "));
            };
            node.refresh_all().await;
            vec![node.status()]
        }
        None => {
            registry.refresh_all().await;
            registry.statuses()
        }
    };

    let output = StatusOutput {
        nodes,
        groups: dashboard.applications.groups().to_vec(),
        totals: exceptions::totals(registry),
        fetched_at: Utc::now(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&output);
    }

    Ok(())
}

fn print_text_output(output: &StatusOutput) {
    for (i, node) in output.nodes.iter().enumerate() {
        if i > 0 {
            println!();
        }

        println!("{} [{}] {}", node.name, node.kind, node.monitor_status.label());
        if !node.description.is_empty() {
            println!("  {}", node.description);
        }
        if let Some(reason) = &node.reason {
            println!("  Reason: {}", reason);
        }

        for cache in &node.caches {
            print_cache_line(cache);
        }
    }

    if !output.groups.is_empty() {
        println!();
        for group in &output.groups {
            println!(
                "{:<20} {:>8} total {:>8} recent",
                group.name, group.total, group.recent_total
            );
        }
    }

    println!();
    println!(
        "Exceptions: {} total, {} recent",
        output.totals.total, output.totals.recent
    );
}

fn print_cache_line(cache: &CacheStatus) {
    let age = cache
        .last_success
        .map(|at| format!("updated {} ago", format_age(at)))
        .unwrap_or_else(|| "no data yet".to_string());

    let error = cache
        .last_error
        .as_ref()
        .map(|e| format!(" (last poll failed: {})", e.message))
        .unwrap_or_default();

    println!(
        "  {:<14} {}{}",
        format!("{}:", cache.name),
        age,
        error
    );
}

fn format_age(at: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(at);

    if duration.num_seconds() <= 0 {
        return "0s".to_string();
    }

    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
