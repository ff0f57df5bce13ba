use super::errors::{exception_store, find_store_node};
use anyhow::Result;
use opwatch::core::settings::Settings;
use opwatch::Dashboard;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Protect,
    Delete,
}

impl Mutation {
    fn verb(&self) -> &'static str {
        match self {
            Mutation::Protect => "Protected",
            Mutation::Delete => "Deleted",
        }
    }
}

pub async fn run(settings: &Settings, store: &str, guid: Uuid, mutation: Mutation) -> Result<()> {
    let dashboard = Dashboard::from_settings(settings)?;
    let node = find_store_node(&dashboard, store)?;
    let store = exception_store(&node)?;

    let changed = match mutation {
        Mutation::Protect => store.protect_error(guid).await?,
        Mutation::Delete => store.delete_error(guid).await?,
    };

    if changed {
        tracing::info!(store = %store.name(), %guid, ?mutation, "Error updated");
        println!("{} {}", mutation.verb(), guid);
    } else {
        println!("No change for {} (unknown guid or already in that state)", guid);
    }

    Ok(())
}
