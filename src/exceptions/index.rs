use super::models::{Application, ApplicationGroup};
use crate::core::settings::GroupSettings;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const OTHER_GROUP: &str = "Other";

/// Cross-store view of applications, rebuilt whenever any store's
/// application list refreshes.
///
/// Applications with the same name in several stores are merged: counts are
/// summed and the latest `most_recent` wins. Configured groups come first in
/// configuration order; anything unclaimed lands in [`OTHER_GROUP`].
#[derive(Debug)]
pub struct ApplicationIndex {
    config: Vec<GroupSettings>,
    by_store: RwLock<BTreeMap<String, Arc<Vec<Application>>>>,
    groups: RwLock<Arc<Vec<ApplicationGroup>>>,
}

impl ApplicationIndex {
    pub fn new(config: Vec<GroupSettings>) -> Self {
        let groups = build_groups(&config, &BTreeMap::new());
        Self {
            config,
            by_store: RwLock::new(BTreeMap::new()),
            groups: RwLock::new(Arc::new(groups)),
        }
    }

    /// Replaces one store's applications and republishes the groups. The
    /// store map stays locked until the new groups are published, so
    /// concurrent updates publish in the order they were applied.
    pub fn update_store(&self, store: &str, applications: Arc<Vec<Application>>) {
        let mut by_store = self.by_store.write();
        by_store.insert(store.to_string(), applications);

        let groups = build_groups(&self.config, &by_store);
        tracing::trace!(groups = groups.len(), "Rebuilt application groups");
        *self.groups.write() = Arc::new(groups);
    }

    pub fn groups(&self) -> Arc<Vec<ApplicationGroup>> {
        Arc::clone(&self.groups.read())
    }

    pub fn group(&self, name: &str) -> Option<ApplicationGroup> {
        self.groups.read().iter().find(|g| g.name == name).cloned()
    }

    /// Application names selected by an optional group and app filter. The
    /// app filter wins; an unknown group selects nothing.
    pub fn app_names(&self, group: Option<&str>, app: Option<&str>) -> Vec<String> {
        if let Some(app) = app {
            return vec![app.to_string()];
        }

        let groups = self.groups.read();
        match group {
            Some(group) => groups
                .iter()
                .filter(|g| g.name == group)
                .flat_map(|g| g.applications.iter().map(|a| a.name.clone()))
                .collect(),
            None => groups
                .iter()
                .flat_map(|g| g.applications.iter().map(|a| a.name.clone()))
                .collect(),
        }
    }
}

fn build_groups(
    config: &[GroupSettings],
    by_store: &BTreeMap<String, Arc<Vec<Application>>>,
) -> Vec<ApplicationGroup> {
    let merged = merge_applications(by_store);
    let mut claimed = HashSet::new();

    let mut groups: Vec<ApplicationGroup> = config
        .iter()
        .map(|group| {
            let apps: Vec<Application> = merged
                .values()
                .filter(|app| group.applications.iter().any(|name| *name == app.name))
                .cloned()
                .collect();
            claimed.extend(apps.iter().map(|app| app.name.clone()));
            ApplicationGroup::new(&group.name, apps)
        })
        .collect();

    let other: Vec<Application> = merged
        .into_values()
        .filter(|app| !claimed.contains(&app.name))
        .collect();
    if !other.is_empty() {
        groups.push(ApplicationGroup::new(OTHER_GROUP, other));
    }
    groups
}

fn merge_applications(
    by_store: &BTreeMap<String, Arc<Vec<Application>>>,
) -> BTreeMap<String, Application> {
    let mut merged: BTreeMap<String, Application> = BTreeMap::new();

    for app in by_store.values().flat_map(|apps| apps.iter()) {
        match merged.get_mut(&app.name) {
            Some(existing) => {
                existing.exception_count += app.exception_count;
                existing.recent_exception_count += app.recent_exception_count;
                existing.most_recent = existing.most_recent.max(app.most_recent);
                existing.store_name = format!("{}, {}", existing.store_name, app.store_name);
            }
            None => {
                merged.insert(app.name.clone(), app.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn app(store: &str, name: &str, count: u64) -> Application {
        Application {
            name: name.to_string(),
            store_name: store.to_string(),
            exception_count: count,
            recent_exception_count: 1,
            most_recent: None,
        }
    }

    fn index() -> ApplicationIndex {
        ApplicationIndex::new(vec![
            GroupSettings {
                name: "Core".to_string(),
                applications: vec!["Core".to_string(), "Core API".to_string()],
            },
            GroupSettings {
                name: "Careers".to_string(),
                applications: vec!["Careers".to_string()],
            },
        ])
    }

    #[test]
    fn test_empty_index_has_configured_groups() {
        let index = index();
        let groups = index.groups();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.total == 0));
        assert!(index.app_names(None, None).is_empty());
    }

    #[test]
    fn test_groups_merge_across_stores() {
        let index = index();
        index.update_store(
            "ny",
            Arc::new(vec![app("ny", "Core", 10), app("ny", "Chat", 3)]),
        );
        index.update_store("or", Arc::new(vec![app("or", "Core", 5)]));

        let core = index.group("Core").unwrap();
        assert_eq!(core.total, 15);
        assert_eq!(core.recent_total, 2);
        assert_eq!(core.applications.len(), 1);
        assert_eq!(core.applications[0].store_name, "ny, or");

        let other = index.group(OTHER_GROUP).unwrap();
        assert_eq!(other.applications[0].name, "Chat");
        assert_eq!(index.groups().len(), 3);
    }

    #[test]
    fn test_store_update_replaces_previous_list() {
        let index = index();
        index.update_store("ny", Arc::new(vec![app("ny", "Chat", 3)]));
        index.update_store("ny", Arc::new(vec![app("ny", "Core", 1)]));

        assert!(index.group(OTHER_GROUP).is_none());
        assert_eq!(index.group("Core").unwrap().total, 1);
    }

    #[test]
    fn test_latest_most_recent_wins() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let index = index();

        let mut a = app("ny", "Core", 1);
        a.most_recent = Some(late);
        let mut b = app("or", "Core", 1);
        b.most_recent = Some(early);
        index.update_store("ny", Arc::new(vec![a]));
        index.update_store("or", Arc::new(vec![b]));

        let core = index.group("Core").unwrap();
        assert_eq!(core.applications[0].most_recent, Some(late));
    }

    #[test]
    fn test_app_names_filters() {
        let index = index();
        index.update_store(
            "ny",
            Arc::new(vec![
                app("ny", "Core", 1),
                app("ny", "Core API", 1),
                app("ny", "Chat", 1),
            ]),
        );

        let mut core = index.app_names(Some("Core"), None);
        core.sort();
        assert_eq!(core, vec!["Core", "Core API"]);
        assert_eq!(index.app_names(Some("Core"), Some("Chat")), vec!["Chat"]);
        assert!(index.app_names(Some("Missing"), None).is_empty());
        assert_eq!(index.app_names(None, None).len(), 3);
    }

    #[test]
    fn test_concurrent_store_updates_keep_every_store() {
        let index = Arc::new(index());
        let stores: Vec<String> = (0..16).map(|i| format!("sql{i:02}")).collect();

        std::thread::scope(|scope| {
            for store in &stores {
                let index = Arc::clone(&index);
                scope.spawn(move || {
                    for round in 0..50 {
                        let name = format!("{store}-app");
                        index.update_store(store, Arc::new(vec![app(store, &name, round + 1)]));
                    }
                });
            }
        });

        let other = index.group(OTHER_GROUP).unwrap();
        assert_eq!(other.applications.len(), stores.len());
        assert_eq!(other.total, 50 * stores.len() as u64);
    }
}
