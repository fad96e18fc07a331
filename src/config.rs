use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `uristore.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Root directory for the `file` scheme
    pub data_dir: Option<String>,
    /// SQLite database for the `sql` scheme (`:memory:` allowed)
    pub database: Option<String>,
    /// Key column of SQL tables (default `id`)
    pub key_column: Option<String>,
    /// Codec chain for types without their own
    pub default_codecs: Option<Vec<String>>,
}

impl StoreConfig {
    /// Config written by `uristore init`, rooted at `base`
    pub fn default_in(base: &Path) -> Self {
        Self {
            data_dir: Some(base.join(".uristore").join("data").display().to_string()),
            database: Some(default_database_path_in(base).display().to_string()),
            key_column: None,
            default_codecs: None,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("uristore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".uristore").join("store.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uristore.toml");
        let config = StoreConfig {
            default_codecs: Some(vec!["toml".into(), "json".into()]),
            ..StoreConfig::default_in(dir.path())
        };

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.database, config.database);
        assert_eq!(loaded.default_codecs, Some(vec!["toml".to_string(), "json".to_string()]));
        assert!(loaded.key_column.is_none());
    }

    #[test]
    fn test_ensure_db_dir() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("nested").join("store.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }
}
