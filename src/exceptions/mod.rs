//! Exception stores: the monitored backends the poll engine was built for.

mod backend;
mod index;
mod memory;
mod models;
mod store;

pub use backend::ExceptionBackend;
pub use index::{ApplicationIndex, OTHER_GROUP};
pub use memory::MemoryBackend;
pub use models::{Application, ApplicationGroup, ExceptionRecord, ExceptionTotals};
pub use store::{totals, ExceptionStore, NODE_KIND};

use crate::core::settings::ExceptionsSettings;
use crate::poll::Registry;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Builds one [`ExceptionStore`] node per configured store and registers it.
/// Returns the shared application index the stores feed.
pub fn register_stores(
    registry: &mut Registry,
    settings: &ExceptionsSettings,
) -> Result<Arc<ApplicationIndex>> {
    let index = Arc::new(ApplicationIndex::new(settings.groups.clone()));

    for store_settings in &settings.stores {
        let backend = MemoryBackend::open(&store_settings.connection_string)
            .with_context(|| format!("Failed to open exception store '{}'", store_settings.name))?;

        let store = ExceptionStore::new(
            store_settings.clone(),
            settings,
            Arc::new(backend),
            Arc::clone(&index),
        );
        registry
            .register(store.into_node())
            .context("Invalid exception store configuration")?;

        tracing::info!(
            store = %store_settings.name,
            poll_interval_secs = store_settings.poll_interval_seconds,
            min_secs_between_polls = store_settings.min_seconds_between_polls,
            "Registered exception store"
        );
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RegistryError;
    use crate::core::settings::StoreSettings;

    fn store(name: &str) -> StoreSettings {
        StoreSettings {
            name: name.to_string(),
            ..StoreSettings::default()
        }
    }

    #[test]
    fn test_registers_one_node_per_store() {
        let settings = ExceptionsSettings {
            stores: vec![store("ny-sql01"), store("or-sql01")],
            ..ExceptionsSettings::default()
        };

        let mut registry = Registry::new();
        register_stores(&mut registry, &settings).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.sources::<ExceptionStore>().count(), 2);
    }

    #[test]
    fn test_duplicate_store_names_fail() {
        let settings = ExceptionsSettings {
            stores: vec![store("ny-sql01"), store("ny-sql01")],
            ..ExceptionsSettings::default()
        };

        let mut registry = Registry::new();
        let err = register_stores(&mut registry, &settings).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::DuplicateName("ny-sql01".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bad_connection_string_fails() {
        let mut bad = store("ny-sql01");
        bad.connection_string = "Server=ny-sql01".to_string();
        let settings = ExceptionsSettings {
            stores: vec![bad],
            ..ExceptionsSettings::default()
        };

        let mut registry = Registry::new();
        assert!(register_stores(&mut registry, &settings).is_err());
        assert!(registry.is_empty());
    }
}
