use crate::core::settings::Settings;
use crate::exceptions::{self, ApplicationIndex};
use crate::poll::Registry;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Everything built from configuration at startup: the node registry and
/// the cross-store application index.
pub struct Dashboard {
    pub registry: Arc<Registry>,
    pub applications: Arc<ApplicationIndex>,
}

impl Dashboard {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate().context("Invalid configuration")?;

        let mut registry = Registry::new();
        let applications = exceptions::register_stores(&mut registry, &settings.exceptions)?;

        Ok(Self {
            registry: Arc::new(registry),
            applications,
        })
    }
}
