use anyhow::{Context, Result};
use opwatch::core::error::StoreError;
use opwatch::core::settings::Settings;
use opwatch::exceptions::{ExceptionRecord, ExceptionStore};
use opwatch::poll::PollNode;
use opwatch::Dashboard;
use std::sync::Arc;

pub struct ErrorsQuery {
    pub store: String,
    pub app: Option<String>,
    pub group: Option<String>,
    pub count: usize,
}

pub async fn run(settings: &Settings, query: ErrorsQuery, json: bool) -> Result<()> {
    let dashboard = Dashboard::from_settings(settings)?;
    let node = find_store_node(&dashboard, &query.store)?;
    let store = exception_store(&node)?;

    if query.group.is_some() {
        dashboard.registry.refresh_all().await;
    } else {
        node.refresh_all().await;
    }

    let errors = store.error_summary_for(query.count, query.group.as_deref(), query.app.as_deref());

    if json {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    } else {
        print_errors(&errors);
    }

    Ok(())
}

pub fn find_store_node(dashboard: &Dashboard, name: &str) -> Result<Arc<PollNode>> {
    dashboard
        .registry
        .get(name)
        .cloned()
        .ok_or_else(|| StoreError::UnknownStore(name.to_string()).into())
}

pub fn exception_store(node: &PollNode) -> Result<&ExceptionStore> {
    node.source::<ExceptionStore>()
        .with_context(|| format!("Node '{}' is not an exception store", node.name()))
}

fn print_errors(errors: &[ExceptionRecord]) {
    if errors.is_empty() {
        println!("No errors");
        return;
    }

    for error in errors {
        let protected = if error.is_protected { " [protected]" } else { "" };
        println!(
            "{}  {:<16} {}{}",
            error.creation_date.format("%Y-%m-%d %H:%M:%S"),
            error.application_name,
            error.message,
            protected
        );
        println!("    {}", error.guid);
    }
}
