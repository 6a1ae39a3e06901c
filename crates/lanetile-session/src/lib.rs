//! Planning session and configuration for lanetile.
//!
//! # Overview
//!
//! A [`Session`] bundles everything one planning run needs:
//!
//! - The resolved [`PlatformLimits`]
//! - The [`PlannerOptions`] tunables
//! - The operator [`TilingRegistry`]
//!
//! Settings come from a `lanetile.toml` file:
//!
//! ```toml
//! [platform]
//! preset = "vector-48"      # or lanes / scratch_bytes / alignment
//! scratch_bytes = 131072    # overrides the preset
//!
//! [planner]
//! double_buffer = true
//! max_slices = 4096
//! deterministic = false
//! ```
//!
//! Every key is optional; an empty file plans for the default platform with
//! default options.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use camino::{Utf8Path, Utf8PathBuf};
use lanetile_target::{PlatformLimits, Preset, TargetError};
use lanetile_tiling::{Plan, Planner, PlannerOptions, TilingInput, TilingRegistry, TilingResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Name of the configuration file looked up by [`find_config`].
pub const CONFIG_FILE: &str = "lanetile.toml";

/// Errors from loading and resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(Utf8PathBuf),

    /// Configuration is well-formed TOML but not a usable setting.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid platform limits.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The `[platform]` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Named preset to start from.
    pub preset: Option<String>,
    /// Lane count override.
    pub lanes: Option<u32>,
    /// Per-lane scratch capacity override, in bytes.
    pub scratch_bytes: Option<u64>,
    /// Alignment override, in bytes.
    pub alignment: Option<u32>,
}

impl PlatformConfig {
    /// Resolve the table to validated limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the preset is unknown or an override is invalid.
    pub fn resolve(&self) -> ConfigResult<PlatformLimits> {
        let base = match &self.preset {
            Some(name) => Preset::from_name(name)?.limits(),
            None => PlatformLimits::default(),
        };
        let limits = PlatformLimits::new(
            self.lanes.unwrap_or(base.lane_count()),
            self.scratch_bytes.unwrap_or(base.scratch_bytes_per_lane()),
            self.alignment.unwrap_or(base.alignment_bytes()),
        )?;
        Ok(limits)
    }
}

/// Contents of a `lanetile.toml` file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Target platform.
    pub platform: PlatformConfig,
    /// Planner tunables.
    pub planner: PlannerOptions,
}

impl Config {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Utf8Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::ConfigNotFound(path.to_path_buf())
            } else {
                ConfigError::Io(e)
            }
        })?;
        debug!(%path, "loaded configuration");
        Self::parse(&content)
    }

    /// Parse a configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid TOML, has unknown keys,
    /// or sets a planner limit to zero.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the platform limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the `[platform]` table is invalid.
    pub fn platform(&self) -> ConfigResult<PlatformLimits> {
        self.platform.resolve()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.planner.max_slices == 0 {
            return Err(ConfigError::InvalidConfig(
                "planner.max_slices must be at least 1".to_string(),
            ));
        }
        if self.planner.max_row_ratio == 0 {
            return Err(ConfigError::InvalidConfig(
                "planner.max_row_ratio must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Find the configuration file in a directory or its parents.
#[must_use]
pub fn find_config(start: impl AsRef<Utf8Path>) -> Option<Utf8PathBuf> {
    start
        .as_ref()
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|path| path.exists())
}

/// State for a planning run.
#[derive(Debug)]
pub struct Session {
    limits: PlatformLimits,
    options: PlannerOptions,
    registry: TilingRegistry,
}

impl Session {
    /// Create a session with the built-in operators.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be resolved.
    pub fn new(config: &Config) -> ConfigResult<Self> {
        Ok(Self {
            limits: config.platform()?,
            options: config.planner,
            registry: TilingRegistry::with_builtin(),
        })
    }

    /// Create a session with default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            limits: PlatformLimits::default(),
            options: PlannerOptions::default(),
            registry: TilingRegistry::with_builtin(),
        }
    }

    /// Replace the platform limits.
    #[must_use]
    pub fn with_limits(mut self, limits: PlatformLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Target limits.
    #[must_use]
    pub const fn limits(&self) -> &PlatformLimits {
        &self.limits
    }

    /// Planner tunables.
    #[must_use]
    pub const fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Mutable access to the planner tunables.
    pub fn options_mut(&mut self) -> &mut PlannerOptions {
        &mut self.options
    }

    /// Operator registry.
    #[must_use]
    pub const fn registry(&self) -> &TilingRegistry {
        &self.registry
    }

    /// A planner for the session's platform and options.
    #[must_use]
    pub const fn planner(&self) -> Planner {
        Planner::new(self.limits, self.options)
    }

    /// Plan one operator invocation.
    ///
    /// # Errors
    ///
    /// Returns any planning error.
    pub fn plan(&self, operator: &str, input: &TilingInput) -> TilingResult<Plan> {
        self.planner().plan_op(&self.registry, operator, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanetile_shape::{DType, Shape};
    use lanetile_tiling::Operand;
    use std::io::Write;

    const SAMPLE: &str = r#"
[platform]
preset = "vector-24"
scratch_bytes = 131072

[planner]
double_buffer = false
deterministic = true
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert!(!config.planner.double_buffer);
        assert!(config.planner.deterministic);
        assert_eq!(config.planner.max_slices, 4096);

        let limits = config.platform().unwrap();
        assert_eq!(limits.lane_count(), 24);
        assert_eq!(limits.scratch_bytes_per_lane(), 131_072);
        assert_eq!(limits.alignment_bytes(), 32);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.platform().unwrap(), PlatformLimits::default());
    }

    #[test]
    fn test_explicit_platform() {
        let config = Config::parse("[platform]\nlanes = 6\nscratch_bytes = 4096\nalignment = 64\n")
            .unwrap();
        let limits = config.platform().unwrap();
        assert_eq!(limits.lane_count(), 6);
        assert_eq!(limits.alignment_bytes(), 64);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            Config::parse("[platform]\nlanes = \"many\"\n"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            Config::parse("[planner]\nmax_slices = 0\n"),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::parse("[planner]\nunknown = 1\n"),
            Err(ConfigError::Toml(_))
        ));

        let bad_preset = Config::parse("[platform]\npreset = \"nope\"\n").unwrap();
        assert!(matches!(
            bad_preset.platform(),
            Err(ConfigError::Target(TargetError::UnknownPreset(_)))
        ));
        let bad_align = Config::parse("[platform]\nalignment = 24\n").unwrap();
        assert!(matches!(
            bad_align.platform(),
            Err(ConfigError::Target(TargetError::BadAlignment(24)))
        ));
    }

    #[test]
    fn test_load_and_find() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert!(matches!(
            Config::load(root.join(CONFIG_FILE)),
            Err(ConfigError::ConfigNotFound(_))
        ));

        let mut file = std::fs::File::create(root.join(CONFIG_FILE)).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, root.join(CONFIG_FILE));
        let config = Config::load(&found).unwrap();
        assert_eq!(config.platform().unwrap().lane_count(), 24);
    }

    #[test]
    fn test_session_plans() {
        let session = Session::new(&Config::parse(SAMPLE).unwrap()).unwrap();
        let input = TilingInput::new(vec![Operand::new(
            "x",
            Shape::new([4096]).unwrap(),
            DType::Float32,
        )]);
        let plan = session.plan("elementwise", &input).unwrap();
        assert_eq!(plan.launch_lane_count(), 24);
        assert!(!plan.buffer.double_buffered);
        assert!(session.plan("conv", &input).is_err());
    }
}
