use std::collections::BTreeMap;

use crate::config::ConfigRegistry;
use crate::errors::{AppError, Result};

/// `copy_from_<source>_to_<destination>` for every source/destination pair, built once
/// at startup.
#[derive(Debug, Clone, Default)]
pub struct ShortcutTable {
    entries: BTreeMap<String, (String, String)>,
}

impl ShortcutTable {
    pub fn build(registry: &ConfigRegistry) -> Self {
        let destinations = registry.list_destinations();
        let entries = registry
            .list_sources()
            .into_iter()
            .flat_map(|source| {
                destinations.iter().map(move |dest| {
                    (
                        format!("copy_from_{}_to_{}", source, dest),
                        (source.to_string(), dest.to_string()),
                    )
                })
            })
            .collect();
        ShortcutTable { entries }
    }

    pub fn resolve(&self, name: &str) -> Result<(&str, &str)> {
        self.entries
            .get(name)
            .map(|(source, dest)| (source.as_str(), dest.as_str()))
            .ok_or_else(|| AppError::UnknownShortcut(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries
            .iter()
            .map(|(name, (source, dest))| (name.as_str(), source.as_str(), dest.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_every_source_destination_pair_gets_a_shortcut() {
        let yaml = r#"
development: { username: root, password: a, database: dev }
test: { username: root, password: a, database: test }
production: { host: db1, username: u, password: p, database: prod, server: gw, server_username: deploy }
staging: { host: db2, username: u, password: p, database: stage, server: gw, server_username: deploy }
"#;
        let registry = ConfigRegistry::from_yaml(Path::new("database.yml"), yaml).unwrap();
        let table = ShortcutTable::build(&registry);

        assert_eq!(table.len(), 4);
        let names: Vec<&str> = table.iter().map(|(name, _, _)| name).collect();
        assert_eq!(
            names,
            vec![
                "copy_from_production_to_development",
                "copy_from_production_to_test",
                "copy_from_staging_to_development",
                "copy_from_staging_to_test",
            ]
        );
        assert_eq!(
            table.resolve("copy_from_staging_to_test").unwrap(),
            ("staging", "test")
        );
    }

    #[test]
    fn test_unknown_shortcut() {
        let table = ShortcutTable::default();
        let err = table.resolve("copy_from_production_to_production").unwrap_err();
        assert!(matches!(err, AppError::UnknownShortcut(name) if name == "copy_from_production_to_production"));
    }
}
