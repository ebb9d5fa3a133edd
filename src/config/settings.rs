//! Chamber settings and thermal cycling presets

use crate::core::cycle::{CycleError, CycleProgram, Step};
use crate::core::transport::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not determine the configuration directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read or written
    #[error("{path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("{path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// Serialization failed
    #[error("Could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Named chamber is not configured
    #[error("No chamber named {0:?} in the configuration")]
    UnknownChamber(String),

    /// Chamber has no address from either the file or the command line
    #[error("No address for chamber {0:?}; configure one or pass --address")]
    MissingAddress(String),

    /// Chamber has no dry-air channel configured
    #[error("No dry_air_channel configured for chamber {0:?}")]
    NoDryAirChannel(String),

    /// Named program is not configured
    #[error("No program named {0:?} in the configuration")]
    UnknownProgram(String),

    /// Temperature outside the configured limits
    #[error("Temperature {value} C is outside the allowed range [{min}, {max}] C")]
    TemperatureOutOfRange {
        /// Requested temperature
        value: f64,
        /// Lower limit
        min: f64,
        /// Upper limit
        max: f64,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Chamber used when none is selected
    pub default_chamber: Option<String>,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Configured chambers by name
    pub chambers: BTreeMap<String, ChamberConfig>,
    /// Thermal cycling presets by name
    pub programs: BTreeMap<String, ProgramConfig>,
}

impl AppConfig {
    /// Load config from the default location, defaults if absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Chamber by name, or the default one
    pub fn chamber(&self, name: Option<&str>) -> Result<Option<(&str, &ChamberConfig)>, ConfigError> {
        let name = match name.or(self.default_chamber.as_deref()) {
            Some(name) => name,
            None if self.chambers.len() == 1 => {
                return Ok(self.chambers.iter().next().map(|(n, c)| (n.as_str(), c)));
            }
            None => return Ok(None),
        };

        self.chambers
            .get_key_value(name)
            .map(|(n, c)| Some((n.as_str(), c)))
            .ok_or_else(|| ConfigError::UnknownChamber(name.to_string()))
    }

    /// Program preset by name
    pub fn program(&self, name: &str) -> Result<&ProgramConfig, ConfigError> {
        self.programs
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProgram(name.to_string()))
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter
    pub level: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// One climate chamber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChamberConfig {
    /// Controller address
    pub address: String,
    /// SIMSERV port
    pub port: u16,
    /// Chamber id behind the controller
    pub id: u32,
    /// Digital channel of the dry-air supply
    pub dry_air_channel: Option<u32>,
    /// Lowest temperature accepted [C]
    pub temperature_min: Option<f64>,
    /// Highest temperature accepted [C]
    pub temperature_max: Option<f64>,
    /// Temperature tolerance [C]
    pub tolerance: f64,
    /// Poll interval while ramping [s]
    pub refresh_secs: f64,
    /// Connection timeout [s]
    pub connect_timeout_secs: u64,
}

impl Default for ChamberConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_PORT,
            id: 1,
            dry_air_channel: None,
            temperature_min: None,
            temperature_max: None,
            tolerance: 0.1,
            refresh_secs: 2.0,
            connect_timeout_secs: 10,
        }
    }
}

impl ChamberConfig {
    /// Reject temperatures outside the configured limits
    pub fn check_temperature(&self, value: f64) -> Result<(), ConfigError> {
        let min = self.temperature_min.unwrap_or(f64::NEG_INFINITY);
        let max = self.temperature_max.unwrap_or(f64::INFINITY);
        if value < min || value > max {
            return Err(ConfigError::TemperatureOutOfRange { value, min, max });
        }
        Ok(())
    }
}

/// Thermal cycling preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Number of cycles
    pub cycles: u32,
    /// Step 1 temperature [C]
    pub temperature_1: f64,
    /// Step 1 dwell [min]
    pub dwell_1: u32,
    /// Step 2 temperature [C]
    pub temperature_2: f64,
    /// Step 2 dwell [min]
    pub dwell_2: u32,
    /// Final step temperature [C]
    pub temperature_3: f64,
    /// Final step dwell [min]
    pub dwell_3: u32,
    /// Tolerance override [C]
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl ProgramConfig {
    /// Temperatures of the steps that will run
    pub fn active_temperatures(&self) -> Vec<f64> {
        [
            (self.temperature_1, self.dwell_1),
            (self.temperature_2, self.dwell_2),
            (self.temperature_3, self.dwell_3),
        ]
        .into_iter()
        .filter(|(_, dwell)| *dwell > 0)
        .map(|(t, _)| t)
        .collect()
    }

    /// Build a runnable program
    pub fn to_program(&self, tolerance: f64, refresh_secs: f64) -> Result<CycleProgram, CycleError> {
        CycleProgram::new(
            self.cycles,
            [
                Step::new(self.temperature_1, self.dwell_1),
                Step::new(self.temperature_2, self.dwell_2),
                Step::new(self.temperature_3, self.dwell_3),
            ],
            self.tolerance.unwrap_or(tolerance),
            refresh_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cycle::StepKind;

    const SAMPLE: &str = r#"
default_chamber = "vt4002"

[logging]
level = "debug"

[chambers.vt4002]
address = "192.168.1.20"
id = 1
dry_air_channel = 3
temperature_min = -40.0
temperature_max = 120.0

[chambers.lab2]
address = "lab2.local"
port = 3000
refresh_secs = 5.0

[programs.burn-in]
cycles = 10
temperature_1 = -40.0
dwell_1 = 30
temperature_2 = 85.0
dwell_2 = 30
temperature_3 = 20.0
dwell_3 = 0
tolerance = 0.5
"#;

    #[test]
    fn test_parse_sample() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");

        let (name, chamber) = config.chamber(None).unwrap().unwrap();
        assert_eq!(name, "vt4002");
        assert_eq!(chamber.port, DEFAULT_PORT);
        assert_eq!(chamber.dry_air_channel, Some(3));
        assert_eq!(chamber.tolerance, 0.1);

        let (_, lab2) = config.chamber(Some("lab2")).unwrap().unwrap();
        assert_eq!(lab2.port, 3000);
        assert_eq!(lab2.id, 1);
        assert_eq!(lab2.refresh_secs, 5.0);

        assert!(matches!(
            config.chamber(Some("missing")),
            Err(ConfigError::UnknownChamber(_))
        ));
    }

    #[test]
    fn test_program_preset() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let preset = config.program("burn-in").unwrap();
        assert_eq!(preset.active_temperatures(), [-40.0, 85.0]);

        let program = preset.to_program(0.1, 2.0).unwrap();
        assert_eq!(program.cycles(), 10);
        assert_eq!(program.tolerance(), 0.5);
        assert!(!program.step(StepKind::Final).is_active());

        assert!(matches!(config.program("soak"), Err(ConfigError::UnknownProgram(_))));
    }

    #[test]
    fn test_temperature_limits() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let (_, chamber) = config.chamber(None).unwrap().unwrap();
        assert!(chamber.check_temperature(25.0).is_ok());
        assert!(chamber.check_temperature(-40.0).is_ok());
        assert!(chamber.check_temperature(150.0).is_err());

        let (_, lab2) = config.chamber(Some("lab2")).unwrap().unwrap();
        assert!(lab2.check_temperature(1000.0).is_ok());
    }

    #[test]
    fn test_single_chamber_is_default() {
        let config: AppConfig = toml::from_str("[chambers.only]\naddress = \"10.0.0.1\"\n").unwrap();
        let (name, _) = config.chamber(None).unwrap().unwrap();
        assert_eq!(name, "only");

        assert!(AppConfig::default().chamber(None).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.chambers.len(), 2);
        assert_eq!(loaded.programs["burn-in"], config.programs["burn-in"]);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[chambers.x\naddress = 1").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
