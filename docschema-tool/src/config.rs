use std::path::{Path, PathBuf};

use docschema_core::{DataSourceOptions, MemoryStoreConfig};
use log::warn;
use serde::Deserialize;

use crate::store::{default_store_path, StoreType};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Schema file used when `--schemas` is not given.
    pub schemas: Option<PathBuf>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub data_source: DataSourceOptions,
    #[serde(default)]
    pub memory: MemoryStoreConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub r#type: StoreType,
    pub path: Option<PathBuf>,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("docschema").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Config::default(),
    }
}

/// Reads a config file, falling back to defaults when it is absent or
/// malformed.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };

    toml::from_str(&content).unwrap_or_else(|e| {
        warn!("ignoring {}: {e}", path.display());
        Config::default()
    })
}

pub fn resolve_store_config(
    config: &Config,
    cli_type: Option<StoreType>,
    cli_path: Option<PathBuf>,
) -> (StoreType, PathBuf) {
    let store_type = cli_type.unwrap_or(config.store.r#type);
    let store_path = cli_path
        .or_else(|| config.store.path.clone())
        .unwrap_or_else(default_store_path);

    (store_type, store_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("config.toml"));
        assert_eq!(config.store.r#type, StoreType::Memory);
        assert!(config.data_source.merge_on_save);
        assert_eq!(config.memory.auto_id_length, 20);
    }

    #[test]
    fn file_values_are_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
schemas = "/srv/schemas.toml"

[store]
type = "rocks"
path = "/srv/docs"

[data_source]
merge_on_save = false
default_limit = 50
"#,
        )
        .unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.schemas, Some(PathBuf::from("/srv/schemas.toml")));
        assert_eq!(config.store.r#type, StoreType::Rocks);
        assert!(!config.data_source.merge_on_save);
        assert_eq!(config.data_source.default_limit, Some(50));
        assert!(config.data_source.report_conversion_errors);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "store = 3").unwrap();
        assert_eq!(load_config_from(&path).store.r#type, StoreType::Memory);
    }

    #[test]
    fn flags_override_file() {
        let config = Config {
            store: StoreConfig {
                r#type: StoreType::Rocks,
                path: Some(PathBuf::from("/from/file")),
            },
            ..Default::default()
        };
        let (store_type, path) =
            resolve_store_config(&config, Some(StoreType::Memory), Some(PathBuf::from("/from/flag")));
        assert_eq!(store_type, StoreType::Memory);
        assert_eq!(path, PathBuf::from("/from/flag"));

        let (store_type, path) = resolve_store_config(&config, None, None);
        assert_eq!(store_type, StoreType::Rocks);
        assert_eq!(path, PathBuf::from("/from/file"));
    }
}
