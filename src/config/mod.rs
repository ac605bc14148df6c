use crate::models::{BridgeConfig, BridgeSettings};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Configuration file name inside the data directory
pub const CONFIG_FILE_NAME: &str = "Bridge Config.yaml";

/// Prefix for environment overrides, e.g. `GALAXY_GOLDBERG__POLL_INTERVAL_MS=5000`
pub const ENV_PREFIX: &str = "GALAXY_GOLDBERG";

/// Configuration manager for loading and saving `Bridge Config.yaml`.
///
/// The file holds the monitoring settings and the list of configured games.
/// Settings can be overridden from the environment; the game list cannot.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "GalaxyGoldberg Data")
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the configuration file, then apply environment overrides to its settings.
    ///
    /// # Returns
    /// The loaded BridgeConfig, or defaults if the file doesn't exist
    pub fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = if self.config_path.exists() {
            let file_contents = fs::read_to_string(&self.config_path)
                .with_context(|| format!("Failed to read config: {}", self.config_path))?;

            let config: BridgeConfig = serde_yaml_ng::from_str(&file_contents)
                .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

            tracing::info!(
                "Loaded config from {} ({} games)",
                self.config_path,
                config.games.len()
            );
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", self.config_path);
            BridgeConfig::default()
        };

        config.settings = apply_env_overrides(config.settings)?;
        Ok(config)
    }

    /// Save the configuration file.
    ///
    /// # Arguments
    /// * `config` - The BridgeConfig to save
    pub fn save_config(&self, config: &BridgeConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

/// Layer `GALAXY_GOLDBERG__*` environment variables over file settings.
///
/// Game keys are user-chosen and case-sensitive, so only the settings section
/// goes through the layered loader.
fn apply_env_overrides(settings: BridgeSettings) -> Result<BridgeSettings> {
    apply_overrides(settings, ::config::Environment::with_prefix(ENV_PREFIX))
}

fn apply_overrides(
    settings: BridgeSettings,
    environment: ::config::Environment,
) -> Result<BridgeSettings> {
    let base = ::config::Config::try_from(&settings).context("Failed to stage settings")?;

    ::config::Config::builder()
        .add_source(base)
        .add_source(
            environment
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read settings overrides from the environment")?
        .try_deserialize()
        .context("Invalid settings override in the environment")
}
