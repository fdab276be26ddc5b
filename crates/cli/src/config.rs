//! Configuration loading for `splicectl`.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use splice_core::config::AppConfig;
use std::path::Path;

/// Load configuration from an optional TOML file, overridden by `SPLICE_`
/// environment variables (`SPLICE_MPU__MAX_CONCURRENT_MERGES=8`).
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        tracing::debug!(config_path = %path.display(), "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    // SPLICE_CONFIG only names the file.
    let config: AppConfig = figment
        .merge(Env::prefixed("SPLICE_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::config::{CleanupOnFailure, StorageConfig};
    use std::fs;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.toml");
        fs::write(
            &path,
            r#"
[storage]
type = "filesystem"
path = "/var/lib/splice"

[buckets]
scratch = "tmp-a"
overflow = "tmp-b"

[mpu]
max_concurrent_merges = 8
cleanup_on_failure = "session"
"#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert!(matches!(config.storage, StorageConfig::Filesystem { .. }));
        assert_eq!(config.buckets.overflow, "tmp-b");
        assert_eq!(config.mpu.max_concurrent_merges, 8);
        assert_eq!(config.mpu.cleanup_on_failure, CleanupOnFailure::Session);
        assert_eq!(config.mpu.gc_page_size, 1000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.toml");
        fs::write(&path, "[buckets]\nscratch = \"same\"\noverflow = \"same\"\n").unwrap();

        let err = load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("must differ"));
    }
}
