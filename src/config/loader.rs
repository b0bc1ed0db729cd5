//! Configuration loader
//!
//! Loads `config.yaml` and `dsl.yaml` from a config directory. An environment suffix
//! (`SHEETC_ENV=dev`) makes `config.dev.yaml` / `dsl.dev.yaml` win when they exist.

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::types::CompilerConfig;
use crate::dsl::{DslParameter, DslRegistry};

pub struct ConfigLoader {
    config_dir: PathBuf,
    env: Option<String>,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            env: None,
        }
    }

    /// Prefer `<name>.<env>.yaml` over `<name>.yaml`
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Create loader from SHEETC_CONFIG_DIR / SHEETC_ENV or default to "config"
    ///
    /// Path resolution order:
    /// 1. SHEETC_CONFIG_DIR environment variable (explicit override)
    /// 2. Relative "config" path, or the nearest ancestor's "config" directory
    /// 3. "config" (missing files then fall back to defaults)
    pub fn from_env() -> Self {
        let env = std::env::var("SHEETC_ENV").ok().filter(|e| !e.is_empty());

        let dir = std::env::var("SHEETC_CONFIG_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|cwd| Self::find_config_dir(&cwd))
            })
            .unwrap_or_else(|| PathBuf::from("config"));

        let loader = Self::new(dir);
        match env {
            Some(env) => loader.with_env(env),
            None => loader,
        }
    }

    /// Look for a "config" directory, walking up at most 5 levels
    fn find_config_dir(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir;
        for _ in 0..5 {
            let config_path = current.join("config");
            if config_path.is_dir() {
                return Some(config_path);
            }
            current = current.parent()?;
        }
        None
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of `<name>.yaml`, honouring the environment override
    fn resolve(&self, name: &str) -> PathBuf {
        if let Some(env) = &self.env {
            let path = self.config_dir.join(format!("{}.{}.yaml", name, env));
            if path.exists() {
                return path;
            }
        }
        self.config_dir.join(format!("{}.yaml", name))
    }

    /// Load compiler settings; a missing file yields the defaults
    pub fn load_config(&self) -> Result<CompilerConfig> {
        let path = self.resolve("config");
        if !path.exists() {
            info!("No {} found, using default compiler config", path.display());
            return Ok(CompilerConfig::default());
        }

        info!("Loading compiler configuration from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(CompilerConfig::default());
        }

        let config: CompilerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        self.validate_config(&config)?;
        Ok(config)
    }

    /// Load DSL prototypes; a missing file yields an empty registry
    pub fn load_dsl(&self) -> Result<DslRegistry> {
        let path = self.resolve("dsl");
        if !path.exists() {
            info!("No {} found, no DSL prototypes registered", path.display());
            return Ok(DslRegistry::new());
        }

        info!("Loading DSL prototypes from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(DslRegistry::new());
        }

        let raw: IndexMap<String, Vec<DslParameter>> = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let registry = DslRegistry::from(raw);

        info!(
            "Loaded {} DSL prototypes with {} total parameters",
            registry.len(),
            registry.iter().map(|p| p.params.len()).sum::<usize>()
        );
        Ok(registry)
    }

    fn validate_config(&self, config: &CompilerConfig) -> Result<()> {
        if !config.parent_table_format.contains("{table}") {
            return Err(anyhow!(
                "parent_table_format '{}' must contain '{{table}}'",
                config.parent_table_format
            ));
        }
        if config.parent_prop_name.trim().is_empty() {
            return Err(anyhow!("parent_prop_name must not be empty"));
        }
        if config.dsl_type_enum_name.trim().is_empty() {
            return Err(anyhow!("dsl_type_enum_name must not be empty"));
        }
        Ok(())
    }
}
