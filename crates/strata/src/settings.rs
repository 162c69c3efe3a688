//! Layered configuration loading
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional config file (TOML, JSON, or YAML by extension)
//! 3. `STRATA__*` environment variables, after loading `.env` if present
//!
//! Nested keys use `__` as the separator, so
//! `STRATA__CONFLICT__SIMILARITY_THRESHOLD=0.7` sets
//! `conflict.similarity_threshold`.

use crate::error::StrataResult;
use config::{Config, Environment, File};
use std::path::Path;
use strata_memory::MemoryConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "STRATA";

/// Load a [`MemoryConfig`] from defaults, `path`, and the environment
pub fn load_config(path: Option<&Path>) -> StrataResult<MemoryConfig> {
    // A missing .env is normal
    let _ = dotenv::dotenv();

    let mut builder = Config::builder();
    if let Some(path) = path {
        tracing::debug!(path = %path.display(), "Loading config file");
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: MemoryConfig = builder.build()?.try_deserialize()?;
    tracing::debug!(workspace = %config.workspace_id, "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrataError;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[conflict]\nsimilarity_threshold = 0.7\n\n[theme]\nmax_size = 12\n"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert!((config.conflict.similarity_threshold - 0.7).abs() < 1e-6);
        assert_eq!(config.theme.max_size, 12);
        assert!((config.theme.min_coherence - 0.3).abs() < 1e-9);
        assert!((config.forgetting.min_retention - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("STRATA__REFLECTION__RULE_MIN_THEME_SIZE", "9");
        let config = load_config(None).unwrap();
        std::env::remove_var("STRATA__REFLECTION__RULE_MIN_THEME_SIZE");

        assert_eq!(config.reflection.rule_min_theme_size, 9);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }
}
