//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `apparatus.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use apparatus_adapter_virtual::{BeamModel, DriverKind, DriverOptions};
use apparatus_app::config::HubConfig;
use apparatus_app::worker::Isolation;
use apparatus_domain::input::InputSpec;
use apparatus_domain::path::validate_name;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hub identity, persistence and timing.
    pub hub: HubSection,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Simulated bench shared by the virtual drivers.
    pub bench: BeamModel,
    /// Devices attached under the hub, in attach order.
    pub things: Things,
}

/// `[hub]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HubSection {
    /// Name of the root node; also the top-level key of the state file.
    pub name: String,
    /// Where the snapshot is saved.
    pub state_path: PathBuf,
    pub actuate_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub queue_capacity: usize,
    pub idle_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Drive the hardware to the loaded state after startup.
    pub sync_on_start: bool,
    /// Save the snapshot after the workers stopped.
    pub save_on_shutdown: bool,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// One `[[things]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ThingConfig {
    pub name: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub isolation: Isolation,
    /// Refresh the inputs this often while idle.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub options: DriverOptions,
    /// Inputs to create. Empty means the driver's defaults.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
}

/// The `[[things]]` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Things(pub Vec<ThingConfig>);

impl Config {
    /// Load configuration from `apparatus.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("apparatus.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Apply overrides from `lookup` (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("APPARATUS_HUB_NAME") {
            self.hub.name = val;
        }
        if let Some(val) = lookup("APPARATUS_STATE_PATH") {
            self.hub.state_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("APPARATUS_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    /// Check everything that would otherwise fail while building the hub.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));
        if validate_name(&self.hub.name).is_err() {
            return invalid(format!("hub name {:?} is not a valid node name", self.hub.name));
        }
        let timeouts = [
            ("actuate_timeout_ms", self.hub.actuate_timeout_ms),
            ("io_timeout_ms", self.hub.io_timeout_ms),
            ("idle_timeout_ms", self.hub.idle_timeout_ms),
            ("join_timeout_ms", self.hub.join_timeout_ms),
            ("shutdown_timeout_ms", self.hub.shutdown_timeout_ms),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return invalid(format!("hub.{key} must be non-zero"));
        }
        if self.hub.queue_capacity == 0 {
            return invalid("hub.queue_capacity must be non-zero".to_string());
        }
        for thing in &self.things.0 {
            if validate_name(&thing.name).is_err() {
                return invalid(format!("thing name {:?} is not a valid node name", thing.name));
            }
            if thing.poll_interval_ms == Some(0) {
                return invalid(format!("things.{}.poll_interval_ms must be non-zero", thing.name));
            }
            for (input, spec) in &thing.inputs {
                if let Err(err) = spec.validate() {
                    return invalid(format!("things.{}.inputs.{input}: {err}", thing.name));
                }
            }
        }
        Ok(())
    }

    /// Timing knobs for the hub.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            actuate_timeout: Duration::from_millis(self.hub.actuate_timeout_ms),
            io_timeout: Duration::from_millis(self.hub.io_timeout_ms),
            queue_capacity: self.hub.queue_capacity,
            idle_timeout: Duration::from_millis(self.hub.idle_timeout_ms),
            join_timeout: Duration::from_millis(self.hub.join_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.hub.shutdown_timeout_ms),
        }
    }
}

impl ThingConfig {
    /// Configured inputs, or the driver's defaults when none are listed.
    #[must_use]
    pub fn input_specs(&self) -> Vec<(String, InputSpec)> {
        if self.inputs.is_empty() {
            self.driver.default_inputs()
        } else {
            self.inputs
                .iter()
                .map(|(name, spec)| (name.clone(), *spec))
                .collect()
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

impl Default for HubSection {
    fn default() -> Self {
        let defaults = HubConfig::default();
        let ms = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            name: "apparatus".to_string(),
            state_path: PathBuf::from("apparatus-state.json"),
            actuate_timeout_ms: ms(defaults.actuate_timeout),
            io_timeout_ms: ms(defaults.io_timeout),
            queue_capacity: defaults.queue_capacity,
            idle_timeout_ms: ms(defaults.idle_timeout),
            join_timeout_ms: ms(defaults.join_timeout),
            shutdown_timeout_ms: ms(defaults.shutdown_timeout),
            sync_on_start: true,
            save_on_shutdown: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "apparatus=info".to_string(),
        }
    }
}

/// Two stages and a polled power meter on the virtual bench.
impl Default for Things {
    fn default() -> Self {
        let thing = |name: &str, driver, poll_interval_ms| ThingConfig {
            name: name.to_string(),
            driver,
            isolation: Isolation::Shared,
            poll_interval_ms,
            options: DriverOptions::default(),
            inputs: BTreeMap::new(),
        };
        Self(vec![
            thing("X", DriverKind::Stage, None),
            thing("Y", DriverKind::Stage, None),
            thing("meter", DriverKind::PowerMeter, Some(200)),
        ])
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use apparatus_domain::input::Access;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.hub.name, "apparatus");
        assert_eq!(config.hub.state_path, PathBuf::from("apparatus-state.json"));
        assert_eq!(config.hub_config(), HubConfig::default());
        assert_eq!(config.things.0.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.hub.queue_capacity, 64);
        assert_eq!(config.things.0.len(), 3);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [hub]
            name = 'autoAlign'
            state_path = '/var/lib/apparatus/state.json'
            actuate_timeout_ms = 500
            save_on_shutdown = false

            [logging]
            filter = 'debug'

            [bench]
            peak = 3.0
            optimum = { MEMS = 0.25 }

            [[things]]
            name = 'MEMS'
            driver = 'stage'
            isolation = 'dedicated'
            options = { travel_ms = 20 }

            [things.inputs.position]
            initial = 0.1
            min = -0.5
            max = 0.5

            [[things]]
            name = 'meter'
            driver = 'power_meter'
            poll_interval_ms = 50
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.hub.name, "autoAlign");
        assert_eq!(config.hub.actuate_timeout_ms, 500);
        assert!(!config.hub.save_on_shutdown);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.bench.optimum["MEMS"], 0.25);

        let mems = &config.things.0[0];
        assert_eq!(mems.isolation, Isolation::Dedicated);
        assert_eq!(mems.options.travel_ms, 20);
        let inputs = mems.input_specs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].1.max, Some(0.5));
        assert_eq!(inputs[0].1.access, Access::ReadWrite);

        let meter = &config.things.0[1];
        assert_eq!(meter.poll_interval(), Some(Duration::from_millis(50)));
        assert_eq!(meter.input_specs().len(), 2);
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.hub.name, "apparatus");
    }

    #[test]
    fn should_apply_overrides_with_rust_log_last() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "APPARATUS_HUB_NAME" => Some("bench2".to_string()),
            "APPARATUS_STATE_PATH" => Some("/tmp/state.json".to_string()),
            "APPARATUS_LOG" => Some("warn".to_string()),
            "RUST_LOG" => Some("trace".to_string()),
            _ => None,
        });
        assert_eq!(config.hub.name, "bench2");
        assert_eq!(config.hub.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_reject_invalid_hub_name() {
        let mut config = Config::default();
        config.hub.name = "lab.one".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_zero_timeout() {
        let mut config = Config::default();
        config.hub.join_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("join_timeout_ms"));
    }

    #[test]
    fn should_reject_inverted_input_bounds() {
        let toml = "
            [[things]]
            name = 'X'
            driver = 'stage'
            [things.inputs.position]
            min = 1.0
            max = -1.0
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_report_parse_error_for_unknown_driver() {
        let result: Result<Config, _> = toml::from_str("[[things]]\nname = 'X'\ndriver = 'laser'");
        assert!(result.is_err());
    }
}
